//! Periodic reconciliation against a remote dispatcher.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::{AppResult, SchedulerHandle};
use crate::runtime::dispatcher::Dispatcher;

/// Counts from one reconcile tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Task updates applied to the scheduler.
    pub updates: usize,
    /// Actions delivered to the dispatcher.
    pub sent: usize,
    /// Actions the dispatcher rejected; they are recomputed next tick.
    pub failed: usize,
}

/// Polls a [`Dispatcher`] and keeps it aligned with a shared scheduler.
pub struct ReconcileService<D: Dispatcher> {
    handle: SchedulerHandle,
    dispatcher: Arc<D>,
    period: Duration,
}

impl<D: Dispatcher> ReconcileService<D> {
    /// Service reconciling `handle` against `dispatcher` every `period`.
    pub fn new(handle: SchedulerHandle, dispatcher: D, period: Duration) -> Self {
        Self {
            handle,
            dispatcher: Arc::new(dispatcher),
            period,
        }
    }

    /// The shared scheduler.
    pub const fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// One round: pull task updates, diff bindings, push actions.
    ///
    /// The scheduler lock is only held while applying updates and computing
    /// the diff, never across a dispatcher call.
    pub async fn tick(&self) -> AppResult<TickReport> {
        let mut report = TickReport::default();

        let updates = self
            .dispatcher
            .task_updates()
            .await
            .context("fetching task updates")?;
        if !updates.is_empty() {
            self.handle
                .notify(&updates)
                .context("applying task updates")?;
            report.updates = updates.len();
        }

        let observed = self
            .dispatcher
            .observed_bindings()
            .await
            .context("fetching observed bindings")?;
        let actions = self.handle.reconcile(&observed);

        for action in actions {
            match self.dispatcher.send(action).await {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    warn!("reconcile: dispatcher rejected action: {err}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Tick every `period` until `shutdown` fires or its sender is dropped.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period = ?self.period, "reconcile service started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("reconcile service stopping");
                    return;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) => debug!(?report, "reconcile tick"),
                        Err(err) => warn!("reconcile tick error: {err:?}"),
                    }
                }
            }
        }
    }
}

//! Shared single-writer handle around a scheduler and its reconciler.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::core::error::SchedulerError;
use crate::core::events::{EventSink, TracingEventSink};
use crate::core::reconciler::{
    Cancellation, IdleWorker, ReconcileAction, Reconciler, TaskUpdate, WorkerAssignment,
};
use crate::core::scheduler::Scheduler;
use crate::util::types::{RequestId, Timestamp, WorkerId};

/// Everything guarded by a [`SchedulerHandle`].
pub struct Shared {
    /// The scheduler.
    pub scheduler: Scheduler,
    /// Its pending-assignment ledger.
    pub reconciler: Reconciler,
    /// Where task events go.
    pub sink: Box<dyn EventSink + Send>,
}

/// Cloneable handle serializing access to one scheduler.
///
/// Every operation takes the lock for its whole duration, so passes and
/// notifications never interleave.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Mutex<Shared>>,
}

impl SchedulerHandle {
    /// Wrap a scheduler with an empty reconciler; events go to `tracing`.
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Shared {
                scheduler,
                reconciler: Reconciler::new(),
                sink: Box::new(TracingEventSink),
            })),
        }
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_event_sink(self, sink: Box<dyn EventSink + Send>) -> Self {
        self.inner.lock().sink = sink;
        self
    }

    /// Lock the shared state.
    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.lock()
    }

    /// Run `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// See [`Reconciler::assign_tasks`].
    pub fn assign_tasks(
        &self,
        now: Timestamp,
        idle_workers: &[IdleWorker],
    ) -> Result<Vec<WorkerAssignment>, SchedulerError> {
        self.with(|shared| {
            shared
                .reconciler
                .assign_tasks(&mut shared.scheduler, now, idle_workers, &mut *shared.sink)
        })
    }

    /// See [`Reconciler::notify`].
    pub fn notify(&self, updates: &[TaskUpdate]) -> Result<(), SchedulerError> {
        self.with(|shared| {
            shared
                .reconciler
                .notify(&mut shared.scheduler, updates, &mut *shared.sink)
        })
    }

    /// See [`Reconciler::reconcile`].
    pub fn reconcile(&self, observed: &BTreeMap<WorkerId, RequestId>) -> Vec<ReconcileAction> {
        self.with(|shared| shared.reconciler.reconcile(&shared.scheduler, observed))
    }

    /// See [`Reconciler::cancellations`].
    #[must_use]
    pub fn cancellations(&self) -> Vec<Cancellation> {
        self.lock().reconciler.cancellations()
    }

    /// JSON snapshot of the scheduler.
    pub fn snapshot_json(&self) -> Result<String, SchedulerError> {
        self.lock().scheduler.to_json()
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle").finish_non_exhaustive()
    }
}

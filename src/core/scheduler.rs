//! The quota scheduler facade.
//!
//! [`Scheduler`] owns a [`SchedulerConfig`] and a [`SchedulerState`] and is the
//! only public way to change them. It has no internal locking; wrap it in a
//! [`SchedulerHandle`](crate::core::SchedulerHandle) to share it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{AccountConfig, SchedulerConfig};
use crate::core::cost::CostVector;
use crate::core::error::SchedulerError;
use crate::core::events::{EventSink, TaskEvent};
use crate::core::model::{TaskRequest, Worker};
use crate::core::mutation::Mutation;
use crate::core::run::SchedulerPass;
use crate::core::state::SchedulerState;
use crate::util::clock::elapsed_secs;
use crate::util::types::{AccountId, LabelSet, Priority, Timestamp};

/// Serializable image of a scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Configuration at snapshot time.
    pub config: SchedulerConfig,
    /// Requests, workers, runs, balances and time.
    pub state: SchedulerState,
}

/// Quota-based preemptive task scheduler.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    state: SchedulerState,
}

impl Scheduler {
    /// Create an empty scheduler at time `now`.
    ///
    /// Accounts listed in `config` start with a zero balance.
    pub fn new(config: SchedulerConfig, now: Timestamp) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::Config)?;
        let mut state = SchedulerState::new(now);
        for id in config.accounts.keys() {
            state
                .balances
                .insert(id.clone(), CostVector::zero(config.priorities));
        }
        Ok(Self { config, state })
    }

    /// Current configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Create or replace an account.
    ///
    /// Balances with NaN or infinite components are rejected.
    pub fn add_account(
        &mut self,
        account_id: impl Into<AccountId>,
        account: AccountConfig,
        initial_balance: CostVector,
    ) -> Result<(), SchedulerError> {
        let account_id = account_id.into();
        if account_id.is_empty() {
            return Err(SchedulerError::InvalidRequest("empty account id".into()));
        }
        account
            .validate(self.config.priorities)
            .map_err(|e| SchedulerError::Config(format!("account `{account_id}` invalid: {e}")))?;
        require_finite("initial balance", &account_id, &initial_balance)?;
        tracing::info!(account = %account_id, "account added");
        self.config.accounts.insert(account_id.clone(), account);
        self.state.balances.insert(account_id, initial_balance);
        Ok(())
    }

    /// Add a one-off grant to an account's balance. The grant must be finite.
    pub fn top_up_account(
        &mut self,
        account_id: &str,
        grant: &CostVector,
    ) -> Result<(), SchedulerError> {
        require_finite("grant", account_id, grant)?;
        let balance = self
            .state
            .balances
            .get_mut(account_id)
            .ok_or_else(|| SchedulerError::UnknownAccount(account_id.to_string()))?;
        *balance += grant;
        Ok(())
    }

    /// Balance of one account.
    #[must_use]
    pub fn balance(&self, account_id: &str) -> Option<&CostVector> {
        self.state.balance(account_id)
    }

    /// One worker.
    #[must_use]
    pub fn worker(&self, worker_id: &str) -> Option<&Worker> {
        self.state.worker(worker_id)
    }

    /// Pending or running request with the given id.
    #[must_use]
    pub fn get_request(&self, request_id: &str) -> Option<&TaskRequest> {
        self.state.get_request(request_id)
    }

    /// True if `request_id` is currently running on `worker_id`.
    #[must_use]
    pub fn is_assigned(&self, request_id: &str, worker_id: &str) -> bool {
        self.state.is_assigned(request_id, worker_id)
    }

    /// Enqueue a request, or confirm one already known.
    pub fn add_request(
        &mut self,
        request: TaskRequest,
        now: Timestamp,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        if request.id.is_empty() {
            return Err(SchedulerError::InvalidRequest("empty request id".into()));
        }
        self.state.add_request(request, now, sink);
        Ok(())
    }

    /// Register `worker_id` as idle with the given labels.
    pub fn mark_idle(
        &mut self,
        worker_id: &str,
        labels: LabelSet,
        now: Timestamp,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        require_id("worker", worker_id)?;
        self.state.mark_idle(worker_id, labels, now, sink);
        Ok(())
    }

    /// Authoritative report that `request_id` runs on `worker_id` as of `now`.
    pub fn notify_task_running(
        &mut self,
        request_id: &str,
        worker_id: &str,
        now: Timestamp,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        require_id("request", request_id)?;
        require_id("worker", worker_id)?;
        self.state.notify_task_running(request_id, worker_id, now, sink);
        Ok(())
    }

    /// Authoritative report that `request_id` is neither queued nor running.
    pub fn notify_task_absent(
        &mut self,
        request_id: &str,
        now: Timestamp,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        require_id("request", request_id)?;
        self.state.notify_task_absent(request_id, now, sink);
        Ok(())
    }

    /// Drop a worker from the fleet, discarding its task.
    pub fn remove_worker(
        &mut self,
        worker_id: &str,
        now: Timestamp,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        require_id("worker", worker_id)?;
        self.state.remove_worker(worker_id, now, sink);
        Ok(())
    }

    /// Advance time to `now`, charging running work and recharging balances.
    pub fn update_time(&mut self, now: Timestamp) -> Result<(), SchedulerError> {
        let previous = self.state.last_update_time;
        if now < previous {
            return Err(SchedulerError::UpdateOrder { previous, next: now });
        }
        let dt = elapsed_secs(previous, now);
        let tiers = self.config.priorities;

        let mut running: BTreeMap<AccountId, Vec<u32>> = BTreeMap::new();
        for worker in self.state.workers.values_mut() {
            let Some(run) = worker.running_task.as_mut() else {
                continue;
            };
            if run.priority < tiers {
                run.cost.add_at(run.priority, dt);
                running
                    .entry(run.request.account_id.clone())
                    .or_insert_with(|| vec![0; tiers])[run.priority] += 1;
            }
        }

        let config = &self.config;
        self.state
            .balances
            .retain(|id, _| config.accounts.contains_key(id));
        for (id, account) in &config.accounts {
            let balance = self
                .state
                .balances
                .entry(id.clone())
                .or_insert_with(|| CostVector::zero(tiers));
            let counts = running.get(id);
            for p in 0..tiers {
                let rate = account.rate_at(p);
                let cap = rate * account.max_charge_seconds;
                let mut value = balance.get(p);
                if value < cap {
                    value = (value + rate * dt).min(cap);
                }
                let jobs = counts.map_or(0, |c| c[p]);
                value -= dt * f64::from(jobs);
                balance.set(p, value);
            }
        }

        self.state.last_update_time = now;
        Ok(())
    }

    /// Advance time to `now` and run one scheduling pass.
    ///
    /// The pass runs on a working copy; on success the copy replaces the
    /// current state and its events are forwarded to `sink`. On failure
    /// nothing changes and nothing is recorded.
    pub fn run_once(
        &mut self,
        now: Timestamp,
        sink: &mut dyn EventSink,
    ) -> Result<Vec<Mutation>, SchedulerError> {
        let mut working = self.clone();
        working.update_time(now)?;

        let mut events: Vec<TaskEvent> = Vec::new();
        let result = SchedulerPass::new(&mut working.state, &working.config).run(&mut events);
        let mutations = match result {
            Ok(mutations) => mutations,
            Err(e) => {
                tracing::error!(error = %e, time = now, "scheduler pass aborted");
                return Err(e);
            }
        };

        *self = working;
        for event in events {
            sink.record(event);
        }
        tracing::info!(
            time = now,
            mutations = mutations.len(),
            pending = self.state.queued_requests.len(),
            workers = self.state.workers.len(),
            "scheduler pass complete"
        );
        Ok(mutations)
    }

    /// Validate and apply one externally produced mutation.
    pub fn apply_mutation(
        &mut self,
        mutation: &Mutation,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        self.state.apply(mutation, &self.config, sink)
    }

    /// Check the structural invariants of the current state.
    pub fn check_invariants(&self) -> Result<(), SchedulerError> {
        self.state.check_invariants(self.free_bucket())
    }

    /// The best-effort tier.
    #[must_use]
    pub const fn free_bucket(&self) -> Priority {
        self.config.free_bucket()
    }

    /// Copy config and state into a serializable snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }

    /// Rebuild a scheduler from a snapshot, re-checking every invariant.
    pub fn from_snapshot(snapshot: SchedulerSnapshot) -> Result<Self, SchedulerError> {
        snapshot.config.validate().map_err(SchedulerError::Config)?;
        let mut state = snapshot.state;
        state.rebuild_index();
        let scheduler = Self {
            config: snapshot.config,
            state,
        };
        scheduler
            .check_invariants()
            .map_err(|e| SchedulerError::Snapshot(format!("inconsistent snapshot: {e}")))?;
        Ok(scheduler)
    }

    /// Encode the scheduler as JSON.
    pub fn to_json(&self) -> Result<String, SchedulerError> {
        serde_json::to_string(&self.to_snapshot())
            .map_err(|e| SchedulerError::Snapshot(e.to_string()))
    }

    /// Decode a scheduler from JSON produced by [`Scheduler::to_json`].
    pub fn from_json(input: &str) -> Result<Self, SchedulerError> {
        let snapshot: SchedulerSnapshot =
            serde_json::from_str(input).map_err(|e| SchedulerError::Snapshot(e.to_string()))?;
        Self::from_snapshot(snapshot)
    }
}

/// Snapshots are JSON, which cannot carry NaN or infinities.
fn require_finite(
    what: &str,
    account_id: &str,
    value: &CostVector,
) -> Result<(), SchedulerError> {
    if !value.is_finite() {
        return Err(SchedulerError::InvalidRequest(format!(
            "{what} for account {account_id} has a non-finite component"
        )));
    }
    Ok(())
}

fn require_id(kind: &str, id: &str) -> Result<(), SchedulerError> {
    if id.is_empty() {
        return Err(SchedulerError::InvalidRequest(format!("empty {kind} id")));
    }
    Ok(())
}

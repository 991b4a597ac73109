//! In-memory scheduler state and external notifications.
//!
//! `SchedulerState` is the authoritative record of pending requests, workers
//! (with their runs), and account balances. Notifications from the outside
//! world land here; matching decisions are applied through
//! [`SchedulerState::apply`](crate::core::mutation).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::cost::CostVector;
use crate::core::error::SchedulerError;
use crate::core::events::{build_task_event, CompletionReason, EventSink, TaskEventKind};
use crate::core::model::{TaskRequest, Worker};
use crate::util::types::{AccountId, LabelSet, Priority, RequestId, Timestamp, WorkerId};

/// Pending requests, workers, and balances for one scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub(crate) queued_requests: BTreeMap<RequestId, TaskRequest>,
    pub(crate) balances: BTreeMap<AccountId, CostVector>,
    pub(crate) workers: BTreeMap<WorkerId, Worker>,
    pub(crate) last_update_time: Timestamp,
    /// Inverse of `workers` for running tasks. `workers` is authoritative.
    #[serde(skip)]
    pub(crate) running: BTreeMap<RequestId, WorkerId>,
}

impl SchedulerState {
    /// Empty state as of `now`.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            last_update_time: now,
            ..Self::default()
        }
    }

    /// Pending requests keyed by id.
    #[must_use]
    pub const fn queued_requests(&self) -> &BTreeMap<RequestId, TaskRequest> {
        &self.queued_requests
    }

    /// Workers keyed by id.
    #[must_use]
    pub const fn workers(&self) -> &BTreeMap<WorkerId, Worker> {
        &self.workers
    }

    /// Account balances keyed by id.
    #[must_use]
    pub const fn balances(&self) -> &BTreeMap<AccountId, CostVector> {
        &self.balances
    }

    /// Balance of one account.
    #[must_use]
    pub fn balance(&self, account_id: &str) -> Option<&CostVector> {
        self.balances.get(account_id)
    }

    /// One worker.
    #[must_use]
    pub fn worker(&self, worker_id: &str) -> Option<&Worker> {
        self.workers.get(worker_id)
    }

    /// Time of the last `update_time` call.
    #[must_use]
    pub const fn last_update_time(&self) -> Timestamp {
        self.last_update_time
    }

    /// Worker a request is running on, if it is running.
    #[must_use]
    pub fn running_worker_for(&self, request_id: &str) -> Option<&WorkerId> {
        self.running.get(request_id)
    }

    /// Pending or running request with the given id.
    #[must_use]
    pub fn get_request(&self, request_id: &str) -> Option<&TaskRequest> {
        if let Some(wid) = self.running.get(request_id) {
            return self
                .workers
                .get(wid)
                .and_then(|w| w.running_task.as_ref())
                .map(|run| &run.request);
        }
        self.queued_requests.get(request_id)
    }

    /// True if `request_id` is currently running on `worker_id`.
    #[must_use]
    pub fn is_assigned(&self, request_id: &str, worker_id: &str) -> bool {
        self.workers
            .get(worker_id)
            .and_then(Worker::running_request_id)
            .is_some_and(|rid| rid == request_id)
    }

    /// Enqueue a request, or treat a repeated add as a confirmation that the
    /// request is waiting.
    pub(crate) fn add_request(
        &mut self,
        request: TaskRequest,
        t: Timestamp,
        sink: &mut dyn EventSink,
    ) {
        let rid = request.id.clone();
        if let Some(known) = self.queued_requests.get_mut(&rid) {
            known.confirm(t);
            return;
        }
        let Some(wid) = self.running.get(&rid).cloned() else {
            self.add_new_request(request, t, sink);
            return;
        };

        // Request was running; the add is only authoritative if it is newer
        // than what we know about both the request and its worker.
        let stale = self
            .workers
            .get(&wid)
            .is_none_or(|w| t < w.latest_confirmed_time());
        if stale {
            tracing::debug!(request = %rid, worker = %wid, "ignoring stale add for running request");
            return;
        }
        self.delete_worker(&wid, CompletionReason::InconsistentWorker, t, sink);
        self.add_new_request(request, t, sink);
    }

    fn add_new_request(&mut self, mut request: TaskRequest, t: Timestamp, sink: &mut dyn EventSink) {
        request.confirm(t);
        sink.record(build_task_event(
            request.id.clone(),
            request.account_id.clone(),
            None,
            t,
            TaskEventKind::Enqueued,
        ));
        self.queued_requests.insert(request.id.clone(), request);
    }

    /// Register a worker as idle with the given labels.
    ///
    /// A running worker that reports idle has finished its task.
    pub(crate) fn mark_idle(
        &mut self,
        worker_id: &str,
        labels: LabelSet,
        t: Timestamp,
        sink: &mut dyn EventSink,
    ) {
        let Some(worker) = self.workers.get_mut(worker_id) else {
            self.workers
                .insert(worker_id.to_string(), Worker::new(worker_id, labels, t));
            return;
        };

        if t < worker.latest_confirmed_time() {
            // Out-of-order delivery; a later mark_idle or notify heals it.
            tracing::debug!(worker = %worker_id, time = t, "ignoring stale idle notification");
            return;
        }

        worker.labels = labels;
        worker.confirm(t);
        if worker.is_idle() {
            return;
        }
        self.complete_run(worker_id, CompletionReason::WorkerIdle, t, sink);
    }

    /// The dispatcher reports `request_id` running on `worker_id`.
    pub(crate) fn notify_task_running(
        &mut self,
        request_id: &str,
        worker_id: &str,
        t: Timestamp,
        sink: &mut dyn EventSink,
    ) {
        let Some(request) = self.get_request(request_id) else {
            // Unknown request, but the report may still be newer than our
            // view of the worker.
            self.delete_inconsistent_worker_if_older(worker_id, t, sink);
            return;
        };
        if t < request.confirmed_time {
            return;
        }

        let alleged = self.running.get(request_id).cloned();
        if alleged.as_deref() == Some(worker_id) {
            if let Some(worker) = self.workers.get_mut(worker_id) {
                worker.confirm(t);
                if let Some(run) = worker.running_task.as_mut() {
                    run.request.confirm(t);
                }
            }
            return;
        }

        if let Some(alleged) = alleged {
            tracing::warn!(
                request = %request_id,
                expected = %alleged,
                reported = %worker_id,
                "request running on unexpected worker"
            );
            self.delete_worker(&alleged, CompletionReason::InconsistentWorker, t, sink);
        } else if let Some(queued) = self.queued_requests.get_mut(request_id) {
            queued.confirm(t);
        }
        self.delete_inconsistent_worker_if_older(worker_id, t, sink);
    }

    /// The dispatcher reports `request_id` neither queued nor running.
    pub(crate) fn notify_task_absent(
        &mut self,
        request_id: &str,
        t: Timestamp,
        sink: &mut dyn EventSink,
    ) {
        if let Some(wid) = self.running.get(request_id).cloned() {
            let fresh = self
                .workers
                .get(&wid)
                .is_some_and(|w| t >= w.latest_confirmed_time());
            if fresh {
                self.delete_worker(&wid, CompletionReason::TaskAbsent, t, sink);
            }
            return;
        }

        let fresh = self
            .queued_requests
            .get(request_id)
            .is_some_and(|r| t >= r.confirmed_time);
        if fresh {
            if let Some(r) = self.queued_requests.remove(request_id) {
                sink.record(build_task_event(
                    r.id,
                    r.account_id,
                    None,
                    t,
                    TaskEventKind::Completed {
                        reason: CompletionReason::TaskAbsent,
                    },
                ));
            }
        }
    }

    /// Drop a worker that left the fleet, along with its task.
    pub(crate) fn remove_worker(&mut self, worker_id: &str, t: Timestamp, sink: &mut dyn EventSink) {
        self.delete_worker(worker_id, CompletionReason::WorkerRemoved, t, sink);
    }

    fn delete_inconsistent_worker_if_older(
        &mut self,
        worker_id: &str,
        t: Timestamp,
        sink: &mut dyn EventSink,
    ) {
        let older = self
            .workers
            .get(worker_id)
            .is_some_and(|w| t >= w.latest_confirmed_time());
        if older {
            self.delete_worker(worker_id, CompletionReason::InconsistentWorker, t, sink);
        }
    }

    /// Delete a worker; its running request, if any, is discarded.
    fn delete_worker(
        &mut self,
        worker_id: &str,
        reason: CompletionReason,
        t: Timestamp,
        sink: &mut dyn EventSink,
    ) {
        let Some(worker) = self.workers.remove(worker_id) else {
            return;
        };
        if let Some(run) = worker.running_task {
            self.running.remove(&run.request.id);
            sink.record(build_task_event(
                run.request.id,
                run.request.account_id,
                Some(worker.id),
                t,
                TaskEventKind::Completed { reason },
            ));
        }
    }

    /// End the run on a worker, keeping the worker as idle.
    fn complete_run(
        &mut self,
        worker_id: &str,
        reason: CompletionReason,
        t: Timestamp,
        sink: &mut dyn EventSink,
    ) {
        let Some(worker) = self.workers.get_mut(worker_id) else {
            return;
        };
        let Some(run) = worker.running_task.take() else {
            return;
        };
        worker.cost_history += &run.cost;
        self.running.remove(&run.request.id);
        sink.record(build_task_event(
            run.request.id,
            run.request.account_id,
            Some(worker_id.to_string()),
            t,
            TaskEventKind::Completed { reason },
        ));
    }

    /// Rebuild the running-request index from `workers`.
    pub(crate) fn rebuild_index(&mut self) {
        self.running = self
            .workers
            .values()
            .filter_map(|w| {
                w.running_request_id()
                    .map(|rid| (rid.to_string(), w.id.clone()))
            })
            .collect();
    }

    /// Check the structural invariants of the state.
    ///
    /// - worker map keys match worker ids, request map keys match request ids;
    /// - no request is both pending and running, or running twice;
    /// - the running index matches the workers exactly;
    /// - every run's required labels are a subset of its worker's labels;
    /// - every run at a funded tier has a known account, and no run is past
    ///   the free bucket.
    pub fn check_invariants(&self, free_bucket: Priority) -> Result<(), SchedulerError> {
        for (rid, request) in &self.queued_requests {
            if *rid != request.id {
                return Err(SchedulerError::violation(format!(
                    "queued request keyed {rid} has id {}",
                    request.id
                )));
            }
        }

        let mut bound: BTreeMap<&str, &str> = BTreeMap::new();
        for (wid, worker) in &self.workers {
            if *wid != worker.id {
                return Err(SchedulerError::violation(format!(
                    "worker keyed {wid} has id {}",
                    worker.id
                )));
            }
            let Some(run) = worker.running_task.as_ref() else {
                continue;
            };
            let rid = run.request.id.as_str();
            if let Some(other) = bound.insert(rid, wid) {
                return Err(SchedulerError::violation(format!(
                    "request {rid} bound to both {other} and {wid}"
                )));
            }
            if self.queued_requests.contains_key(rid) {
                return Err(SchedulerError::violation(format!(
                    "request {rid} is both pending and running on {wid}"
                )));
            }
            if !worker.satisfies(&run.request.labels) {
                return Err(SchedulerError::violation(format!(
                    "request {rid} labels are not a subset of worker {wid} labels"
                )));
            }
            if run.priority > free_bucket {
                return Err(SchedulerError::violation(format!(
                    "request {rid} runs at tier {} past the free bucket {free_bucket}",
                    run.priority
                )));
            }
            if run.priority < free_bucket && !self.balances.contains_key(&run.request.account_id) {
                return Err(SchedulerError::violation(format!(
                    "request {rid} runs at funded tier {} for unknown account {}",
                    run.priority, run.request.account_id
                )));
            }
        }

        if bound.len() != self.running.len()
            || bound
                .iter()
                .any(|(rid, wid)| self.running.get(*rid).map(String::as_str) != Some(*wid))
        {
            return Err(SchedulerError::violation(
                "running index disagrees with worker runs",
            ));
        }
        Ok(())
    }
}

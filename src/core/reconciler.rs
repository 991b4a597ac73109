//! Reconciliation between scheduler decisions and the dispatcher.
//!
//! The dispatcher only learns about a decision when a worker polls for work,
//! and only confirms it later through task updates. The [`Reconciler`]
//! remembers every assignment handed out but not yet acknowledged, so a worker
//! polling again gets the same answer and a preempted task gets cancelled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::events::EventSink;
use crate::core::model::{TaskRequest, Worker};
use crate::core::mutation::Mutation;
use crate::core::scheduler::Scheduler;
use crate::util::types::{LabelSet, Priority, RequestId, Timestamp, WorkerId};

/// A worker asking for work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleWorker {
    /// Worker id.
    pub id: WorkerId,
    /// Labels the worker currently carries.
    pub labels: LabelSet,
}

impl IdleWorker {
    /// Idle worker with the given labels.
    pub fn new(id: impl Into<WorkerId>, labels: LabelSet) -> Self {
        Self {
            id: id.into(),
            labels,
        }
    }
}

/// An assignment communicated to a worker but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    /// Worker the assignment is for.
    pub worker_id: WorkerId,
    /// Request the worker should run.
    pub request_id: RequestId,
    /// Tier the request was admitted at.
    pub priority: Priority,
    /// Request the worker must abort first, for preemptions.
    pub task_to_abort: Option<RequestId>,
    /// Time the assignment was made.
    pub assigned_at: Timestamp,
}

impl WorkerAssignment {
    fn from_mutation(mutation: &Mutation, assigned_at: Timestamp) -> Option<Self> {
        match mutation {
            Mutation::AssignIdleWorker {
                worker_id,
                request_id,
                priority,
            } => Some(Self {
                worker_id: worker_id.clone(),
                request_id: request_id.clone(),
                priority: *priority,
                task_to_abort: None,
                assigned_at,
            }),
            Mutation::PreemptTask {
                worker_id,
                request_id,
                priority,
                task_to_abort,
            } => Some(Self {
                worker_id: worker_id.clone(),
                request_id: request_id.clone(),
                priority: *priority,
                task_to_abort: Some(task_to_abort.clone()),
                assigned_at,
            }),
            Mutation::ChangePriority { .. } => None,
        }
    }
}

/// A running task the dispatcher must stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    /// Worker running the task.
    pub worker_id: WorkerId,
    /// Task to stop.
    pub request_id: RequestId,
}

/// Authoritative news from the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskUpdate {
    /// Request is waiting to run.
    Requested {
        /// The request.
        request: TaskRequest,
        /// Time of the observation.
        time: Timestamp,
    },
    /// Request is running on a worker.
    Running {
        /// Request id.
        request_id: RequestId,
        /// Worker it runs on.
        worker_id: WorkerId,
        /// Time of the observation.
        time: Timestamp,
    },
    /// Request is neither waiting nor running.
    Absent {
        /// Request id.
        request_id: RequestId,
        /// Time of the observation.
        time: Timestamp,
    },
}

/// Outcome of diffing intended bindings against observed ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Observed binding matches intent.
    Confirm {
        /// Worker id.
        worker_id: WorkerId,
        /// Request id.
        request_id: RequestId,
    },
    /// The worker runs something the scheduler did not put there.
    Cancel {
        /// Worker id.
        worker_id: WorkerId,
        /// Request the worker must stop.
        request_id: RequestId,
    },
    /// The worker has not picked up its assignment yet; send it again.
    Renotify(WorkerAssignment),
}

/// Pending-assignment ledger for one scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciler {
    pending: BTreeMap<WorkerId, WorkerAssignment>,
}

impl Reconciler {
    /// Empty reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assignments handed out but not yet acknowledged.
    #[must_use]
    pub const fn pending(&self) -> &BTreeMap<WorkerId, WorkerAssignment> {
        &self.pending
    }

    /// Hand out work to polling idle workers.
    ///
    /// A worker whose previous assignment is still bound in the scheduler gets
    /// it again; any other polling worker is marked idle. One scheduling pass
    /// then runs, and its assignments and preemptions become pending. Returns
    /// the pending assignments of the polling workers.
    ///
    /// A `now` older than the scheduler's time is rejected before any worker
    /// is touched.
    pub fn assign_tasks(
        &mut self,
        scheduler: &mut Scheduler,
        now: Timestamp,
        idle_workers: &[IdleWorker],
        sink: &mut dyn EventSink,
    ) -> Result<Vec<WorkerAssignment>, SchedulerError> {
        let previous = scheduler.state().last_update_time();
        if now < previous {
            return Err(SchedulerError::UpdateOrder { previous, next: now });
        }
        for worker in idle_workers {
            let still_bound = self
                .pending
                .get(&worker.id)
                .is_some_and(|a| scheduler.is_assigned(&a.request_id, &worker.id));
            if still_bound {
                tracing::debug!(worker = %worker.id, "re-sending unacknowledged assignment");
                continue;
            }
            self.pending.remove(&worker.id);
            scheduler.mark_idle(&worker.id, worker.labels.clone(), now, sink)?;
        }

        let mutations = scheduler.run_once(now, sink)?;
        for mutation in &mutations {
            if let Some(assignment) = WorkerAssignment::from_mutation(mutation, now) {
                self.pending.insert(assignment.worker_id.clone(), assignment);
            }
        }

        let assigned: Vec<WorkerAssignment> = idle_workers
            .iter()
            .filter_map(|w| self.pending.get(&w.id).cloned())
            .collect();
        if !assigned.is_empty() {
            tracing::info!(
                polled = idle_workers.len(),
                assigned = assigned.len(),
                "assignments handed out"
            );
        }
        Ok(assigned)
    }

    /// Pending aborts of preempted tasks.
    #[must_use]
    pub fn cancellations(&self) -> Vec<Cancellation> {
        self.pending
            .values()
            .filter_map(|a| {
                a.task_to_abort.as_ref().map(|rid| Cancellation {
                    worker_id: a.worker_id.clone(),
                    request_id: rid.clone(),
                })
            })
            .collect()
    }

    /// Apply dispatcher updates to the scheduler and clear the pending
    /// entries they acknowledge or supersede.
    pub fn notify(
        &mut self,
        scheduler: &mut Scheduler,
        updates: &[TaskUpdate],
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        for update in updates {
            match update {
                TaskUpdate::Requested { request, time } => {
                    scheduler.add_request(request.clone(), *time, sink)?;
                }
                TaskUpdate::Running {
                    request_id,
                    worker_id,
                    time,
                } => {
                    scheduler.notify_task_running(request_id, worker_id, *time, sink)?;
                    let acknowledged = self
                        .pending
                        .get(worker_id)
                        .is_some_and(|a| a.request_id == *request_id);
                    if acknowledged {
                        self.pending.remove(worker_id);
                    }
                }
                TaskUpdate::Absent { request_id, time } => {
                    scheduler.notify_task_absent(request_id, *time, sink)?;
                }
            }
        }
        self.retain_bound(scheduler);
        Ok(())
    }

    /// Diff what the scheduler intends against what the dispatcher observes.
    ///
    /// `observed` maps each busy worker to the request it is running. A task
    /// observed on a worker the scheduler holds idle, or does not know, is
    /// cancelled so the worker can take scheduled work.
    pub fn reconcile(
        &mut self,
        scheduler: &Scheduler,
        observed: &BTreeMap<WorkerId, RequestId>,
    ) -> Vec<ReconcileAction> {
        let mut actions = Vec::new();
        for (worker_id, worker) in scheduler.state().workers() {
            let Some(run) = worker.running_task.as_ref() else {
                continue;
            };
            let intended = &run.request.id;
            match observed.get(worker_id) {
                Some(actual) if actual == intended => {
                    self.pending.remove(worker_id);
                    actions.push(ReconcileAction::Confirm {
                        worker_id: worker_id.clone(),
                        request_id: intended.clone(),
                    });
                }
                Some(actual) => actions.push(ReconcileAction::Cancel {
                    worker_id: worker_id.clone(),
                    request_id: actual.clone(),
                }),
                None => {
                    let assignment = self.pending.get(worker_id).cloned().unwrap_or_else(|| {
                        WorkerAssignment {
                            worker_id: worker_id.clone(),
                            request_id: intended.clone(),
                            priority: run.priority,
                            task_to_abort: None,
                            assigned_at: scheduler.state().last_update_time(),
                        }
                    });
                    actions.push(ReconcileAction::Renotify(assignment));
                }
            }
        }
        for (worker_id, request_id) in observed {
            let unbound = scheduler.worker(worker_id).is_none_or(Worker::is_idle);
            if unbound {
                tracing::warn!(
                    worker = %worker_id,
                    request = %request_id,
                    "task running on a worker with no scheduled binding"
                );
                actions.push(ReconcileAction::Cancel {
                    worker_id: worker_id.clone(),
                    request_id: request_id.clone(),
                });
            }
        }
        if !actions.is_empty() {
            tracing::info!(actions = actions.len(), "reconcile diff computed");
        }
        actions
    }

    /// Drop pending entries the scheduler no longer backs.
    fn retain_bound(&mut self, scheduler: &Scheduler) {
        self.pending
            .retain(|wid, a| scheduler.is_assigned(&a.request_id, wid));
    }
}

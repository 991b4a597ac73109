//! Scheduling decisions and their application to state.

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::core::cost::CostVector;
use crate::core::error::SchedulerError;
use crate::core::events::{build_task_event, EventSink, TaskEventKind};
use crate::core::model::{TaskRequest, TaskRun};
use crate::core::state::SchedulerState;
use crate::util::types::{Priority, RequestId, WorkerId};

/// A scheduling decision produced by a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    /// Bind a pending request to an idle worker.
    AssignIdleWorker {
        /// Idle worker receiving the request.
        worker_id: WorkerId,
        /// Pending request to bind.
        request_id: RequestId,
        /// Tier the run is admitted at.
        priority: Priority,
    },
    /// Move a running task to another tier without interrupting it.
    ChangePriority {
        /// Worker whose run changes tier.
        worker_id: WorkerId,
        /// New tier.
        priority: Priority,
    },
    /// Replace a worker's run with a higher priority request.
    PreemptTask {
        /// Worker being taken over.
        worker_id: WorkerId,
        /// Pending request to bind.
        request_id: RequestId,
        /// Tier of the new run.
        priority: Priority,
        /// Request currently running on the worker.
        task_to_abort: RequestId,
    },
}

impl Mutation {
    /// Worker the decision targets.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        match self {
            Self::AssignIdleWorker { worker_id, .. }
            | Self::ChangePriority { worker_id, .. }
            | Self::PreemptTask { worker_id, .. } => worker_id,
        }
    }

    /// Request newly bound by the decision, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::AssignIdleWorker { request_id, .. } | Self::PreemptTask { request_id, .. } => {
                Some(request_id)
            }
            Self::ChangePriority { .. } => None,
        }
    }

    /// Tier the decision puts the worker's run at.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        match self {
            Self::AssignIdleWorker { priority, .. }
            | Self::ChangePriority { priority, .. }
            | Self::PreemptTask { priority, .. } => *priority,
        }
    }
}

impl SchedulerState {
    /// Validate and apply a mutation.
    ///
    /// Validation is complete before any field is written: on error the state
    /// and the sink are untouched.
    pub(crate) fn apply(
        &mut self,
        mutation: &Mutation,
        config: &SchedulerConfig,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        self.validate_mutation(mutation, config.free_bucket())?;
        tracing::debug!(?mutation, "applying mutation");

        let t = self.last_update_time;
        match mutation {
            Mutation::AssignIdleWorker {
                worker_id,
                request_id,
                priority,
            } => {
                let request = self.take_queued(request_id)?;
                let account_id = request.account_id.clone();
                self.start_run(
                    worker_id,
                    TaskRun {
                        request,
                        priority: *priority,
                        cost: CostVector::zero(config.priorities),
                    },
                )?;
                sink.record(build_task_event(
                    request_id.clone(),
                    account_id,
                    Some(worker_id.clone()),
                    t,
                    TaskEventKind::Assigned {
                        priority: *priority,
                        preempting: false,
                    },
                ));
            }
            Mutation::ChangePriority {
                worker_id,
                priority,
            } => {
                let run = self
                    .workers
                    .get_mut(worker_id)
                    .and_then(|w| w.running_task.as_mut())
                    .ok_or_else(|| {
                        SchedulerError::violation(format!("worker {worker_id} is not running"))
                    })?;
                let old_priority = run.priority;
                if old_priority == *priority {
                    return Ok(());
                }
                run.priority = *priority;
                sink.record(build_task_event(
                    run.request.id.clone(),
                    run.request.account_id.clone(),
                    Some(worker_id.clone()),
                    t,
                    TaskEventKind::Reprioritized {
                        old_priority,
                        new_priority: *priority,
                    },
                ));
            }
            Mutation::PreemptTask {
                worker_id,
                request_id,
                priority,
                task_to_abort,
            } => {
                let old_run = self
                    .workers
                    .get_mut(worker_id)
                    .and_then(|w| w.running_task.take())
                    .ok_or_else(|| {
                        SchedulerError::violation(format!("worker {worker_id} is not running"))
                    })?;
                self.running.remove(task_to_abort);
                let request = self.take_queued(request_id)?;
                let by_account = request.account_id.clone();

                // Zero-sum transfer of the run's cost between accounts.
                let cost = old_run.cost;
                if let Some(balance) = self.balances.get_mut(&old_run.request.account_id) {
                    *balance += &cost;
                }
                if let Some(balance) = self.balances.get_mut(&by_account) {
                    *balance -= &cost;
                }

                sink.record(build_task_event(
                    task_to_abort.clone(),
                    old_run.request.account_id.clone(),
                    Some(worker_id.clone()),
                    t,
                    TaskEventKind::Preempted {
                        by_request: request_id.clone(),
                        by_account: by_account.clone(),
                        priority: old_run.priority,
                        preempting_priority: *priority,
                        cost: cost.clone(),
                    },
                ));
                self.queued_requests
                    .insert(old_run.request.id.clone(), old_run.request);

                self.start_run(
                    worker_id,
                    TaskRun {
                        request,
                        priority: *priority,
                        cost,
                    },
                )?;
                sink.record(build_task_event(
                    request_id.clone(),
                    by_account,
                    Some(worker_id.clone()),
                    t,
                    TaskEventKind::Assigned {
                        priority: *priority,
                        preempting: true,
                    },
                ));
            }
        }
        Ok(())
    }

    fn validate_mutation(
        &self,
        mutation: &Mutation,
        free_bucket: Priority,
    ) -> Result<(), SchedulerError> {
        let worker_id = mutation.worker_id();
        let worker = self
            .workers
            .get(worker_id)
            .ok_or_else(|| SchedulerError::violation(format!("unknown worker {worker_id}")))?;
        let priority = mutation.priority();
        if priority > free_bucket {
            return Err(SchedulerError::violation(format!(
                "tier {priority} is past the free bucket {free_bucket}"
            )));
        }

        let account_id = match mutation {
            Mutation::AssignIdleWorker { request_id, .. } => {
                if !worker.is_idle() {
                    return Err(SchedulerError::violation(format!(
                        "worker {worker_id} is not idle"
                    )));
                }
                self.validate_pending_fits(request_id, worker_id)?
            }
            Mutation::ChangePriority { .. } => worker
                .running_task
                .as_ref()
                .map(|run| run.request.account_id.as_str())
                .ok_or_else(|| {
                    SchedulerError::violation(format!("worker {worker_id} is not running"))
                })?,
            Mutation::PreemptTask {
                request_id,
                task_to_abort,
                ..
            } => {
                let run = worker.running_task.as_ref().ok_or_else(|| {
                    SchedulerError::violation(format!("cannot preempt idle worker {worker_id}"))
                })?;
                if run.request.id != *task_to_abort {
                    return Err(SchedulerError::violation(format!(
                        "worker {worker_id} runs {}, not {task_to_abort}",
                        run.request.id
                    )));
                }
                if priority >= run.priority {
                    return Err(SchedulerError::violation(format!(
                        "preemption of {task_to_abort} must move from tier {} to a more privileged one, got {priority}",
                        run.priority
                    )));
                }
                self.validate_pending_fits(request_id, worker_id)?
            }
        };

        if priority < free_bucket && !self.balances.contains_key(account_id) {
            return Err(SchedulerError::violation(format!(
                "funded tier {priority} for unknown account {account_id}"
            )));
        }
        Ok(())
    }

    /// Request must be pending and its labels carried by the worker. Returns
    /// the request's account.
    fn validate_pending_fits(
        &self,
        request_id: &str,
        worker_id: &str,
    ) -> Result<&str, SchedulerError> {
        let request = self.queued_requests.get(request_id).ok_or_else(|| {
            SchedulerError::violation(format!("request {request_id} is not pending"))
        })?;
        let fits = self
            .workers
            .get(worker_id)
            .is_some_and(|w| w.satisfies(&request.labels));
        if !fits {
            return Err(SchedulerError::violation(format!(
                "worker {worker_id} lacks labels required by {request_id}"
            )));
        }
        Ok(&request.account_id)
    }

    fn take_queued(
        &mut self,
        request_id: &str,
    ) -> Result<TaskRequest, SchedulerError> {
        self.queued_requests.remove(request_id).ok_or_else(|| {
            SchedulerError::violation(format!("request {request_id} is not pending"))
        })
    }

    fn start_run(&mut self, worker_id: &str, run: TaskRun) -> Result<(), SchedulerError> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| SchedulerError::violation(format!("unknown worker {worker_id}")))?;
        self.running
            .insert(run.request.id.clone(), worker_id.to_string());
        worker.running_task = Some(run);
        Ok(())
    }
}

//! Task requests, workers, and the runs that bind them.

use serde::{Deserialize, Serialize};

use crate::core::cost::CostVector;
use crate::util::types::{AccountId, LabelSet, Priority, RequestId, Timestamp, WorkerId};

/// A unit of work waiting for, or bound to, a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Unique request identifier.
    pub id: RequestId,
    /// Account billed for this request. Unknown accounts run best-effort.
    pub account_id: AccountId,
    /// Labels the worker must have.
    pub labels: LabelSet,
    /// Labels the worker should preferably have; not required.
    #[serde(default)]
    pub provisionable_labels: LabelSet,
    /// Time the request entered the queue.
    pub enqueue_time: Timestamp,
    /// Latest time an external authority confirmed this request's state.
    #[serde(default)]
    pub confirmed_time: Timestamp,
}

impl TaskRequest {
    /// New request with no provisionable labels.
    pub fn new(
        id: impl Into<RequestId>,
        account_id: impl Into<AccountId>,
        labels: LabelSet,
        enqueue_time: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            labels,
            provisionable_labels: LabelSet::new(),
            enqueue_time,
            confirmed_time: enqueue_time,
        }
    }

    /// Attach provisionable labels.
    #[must_use]
    pub fn with_provisionable_labels(mut self, labels: LabelSet) -> Self {
        self.provisionable_labels = labels;
        self
    }

    pub(crate) fn confirm(&mut self, t: Timestamp) {
        self.confirmed_time = self.confirmed_time.max(t);
    }
}

/// The live binding of a request to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Request being run.
    pub request: TaskRequest,
    /// Tier the run is currently admitted at.
    pub priority: Priority,
    /// Cost accumulated on this run, including cost inherited by preemption.
    pub cost: CostVector,
}

/// A worker that may run one task at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    /// Unique worker identifier.
    pub id: WorkerId,
    /// Capability labels.
    pub labels: LabelSet,
    /// Current run, if any.
    pub running_task: Option<TaskRun>,
    /// Cost of all runs that completed on this worker.
    #[serde(default)]
    pub cost_history: CostVector,
    /// Latest time an external authority confirmed this worker's state.
    #[serde(default)]
    pub confirmed_time: Timestamp,
}

impl Worker {
    /// New idle worker.
    pub fn new(id: impl Into<WorkerId>, labels: LabelSet, confirmed_time: Timestamp) -> Self {
        Self {
            id: id.into(),
            labels,
            running_task: None,
            cost_history: CostVector::default(),
            confirmed_time,
        }
    }

    /// True iff no run is attached.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.running_task.is_none()
    }

    /// Id of the running request, if any.
    #[must_use]
    pub fn running_request_id(&self) -> Option<&str> {
        self.running_task.as_ref().map(|run| run.request.id.as_str())
    }

    /// Cost used to rank this worker: the live run's cost when busy, the
    /// completed-run history when idle.
    #[must_use]
    pub fn ranking_cost(&self) -> &CostVector {
        self.running_task
            .as_ref()
            .map_or(&self.cost_history, |run| &run.cost)
    }

    /// Whether this worker carries every label in `required`.
    #[must_use]
    pub fn satisfies(&self, required: &LabelSet) -> bool {
        required.is_subset(&self.labels)
    }

    /// Latest of the worker's and its running request's confirmation times.
    #[must_use]
    pub fn latest_confirmed_time(&self) -> Timestamp {
        self.running_task
            .as_ref()
            .map_or(self.confirmed_time, |run| {
                self.confirmed_time.max(run.request.confirmed_time)
            })
    }

    pub(crate) fn confirm(&mut self, t: Timestamp) {
        self.confirmed_time = self.confirmed_time.max(t);
    }
}

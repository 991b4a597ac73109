//! Task event sink implementations.
//!
//! Every state transition the scheduler makes is reported as a [`TaskEvent`].
//! Sinks are pass-through: the scheduler never reads events back.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::cost::CostVector;
use crate::util::types::{AccountId, Priority, RequestId, Timestamp, WorkerId};

/// Why a task left the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The worker running it reported idle.
    WorkerIdle,
    /// The dispatcher reported the task as no longer existing.
    TaskAbsent,
    /// The dispatcher reported a different worker/task pairing.
    InconsistentWorker,
    /// The worker was removed from the fleet.
    WorkerRemoved,
}

/// What happened to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Request entered the pending pool.
    Enqueued,
    /// Request was bound to a worker.
    Assigned {
        /// Tier the run was admitted at.
        priority: Priority,
        /// True if the binding displaced another run.
        preempting: bool,
    },
    /// Running request was displaced and returned to the pending pool.
    Preempted {
        /// Request that took over the worker.
        by_request: RequestId,
        /// Account of the preempting request.
        by_account: AccountId,
        /// Tier the preempted run was at.
        priority: Priority,
        /// Tier of the preempting run.
        preempting_priority: Priority,
        /// Cost moved from the preempted account to the preempting one.
        cost: CostVector,
    },
    /// Running request changed tier without interruption.
    Reprioritized {
        /// Previous tier.
        old_priority: Priority,
        /// New tier.
        new_priority: Priority,
    },
    /// Request left the scheduler.
    Completed {
        /// Why it left.
        reason: CompletionReason,
    },
}

/// A single recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Event identifier.
    pub event_id: String,
    /// Request the event concerns.
    pub request_id: RequestId,
    /// Account of that request.
    pub account_id: AccountId,
    /// Worker involved, if any.
    pub worker_id: Option<WorkerId>,
    /// Scheduler time of the transition.
    pub time: Timestamp,
    /// Transition details.
    #[serde(flatten)]
    pub kind: TaskEventKind,
}

impl TaskEvent {
    /// Short action name, for logs.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self.kind {
            TaskEventKind::Enqueued => "enqueue",
            TaskEventKind::Assigned { .. } => "assign",
            TaskEventKind::Preempted { .. } => "preempt",
            TaskEventKind::Reprioritized { .. } => "reprioritize",
            TaskEventKind::Completed { .. } => "complete",
        }
    }
}

/// Event sink abstraction.
pub trait EventSink {
    /// Record an event.
    fn record(&mut self, event: TaskEvent);
}

/// Buffers events; the scheduler uses this to hold a pass's events until the
/// pass commits.
impl EventSink for Vec<TaskEvent> {
    fn record(&mut self, event: TaskEvent) {
        self.push(event);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&mut self, _event: TaskEvent) {}
}

/// In-memory event sink for testing and dev.
pub struct InMemoryEventSink {
    events: VecDeque<TaskEvent>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.iter().cloned().collect()
    }

    /// Stored events concerning one request, oldest first.
    #[must_use]
    pub fn events_for(&self, request_id: &str) -> Vec<TaskEvent> {
        self.events
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&mut self, event: TaskEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink that forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&mut self, event: TaskEvent) {
        tracing::debug!(
            action = event.action(),
            request = %event.request_id,
            account = %event.account_id,
            worker = event.worker_id.as_deref().unwrap_or("-"),
            time = event.time,
            "task event"
        );
    }
}

/// Helper to build an event with a fresh id.
pub fn build_task_event(
    request_id: impl Into<RequestId>,
    account_id: impl Into<AccountId>,
    worker_id: Option<WorkerId>,
    time: Timestamp,
    kind: TaskEventKind,
) -> TaskEvent {
    TaskEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        request_id: request_id.into(),
        account_id: account_id.into(),
        worker_id,
        time,
        kind,
    }
}

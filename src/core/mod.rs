//! Core scheduling abstractions: cost accounting, state, passes, reconciliation.

pub mod cost;
pub mod error;
pub mod events;
pub mod handle;
pub mod model;
pub mod mutation;
pub mod reconciler;
mod run;
pub mod scheduler;
pub mod state;

pub use cost::{sort_ascending_cost, sort_descending_cost, CostVector};
pub use error::{AppResult, SchedulerError};
pub use events::{
    build_task_event, CompletionReason, EventSink, InMemoryEventSink, NullEventSink, TaskEvent,
    TaskEventKind, TracingEventSink,
};
pub use handle::{SchedulerHandle, Shared};
pub use model::{TaskRequest, TaskRun, Worker};
pub use mutation::Mutation;
pub use reconciler::{
    Cancellation, IdleWorker, ReconcileAction, Reconciler, TaskUpdate, WorkerAssignment,
};
pub use scheduler::{Scheduler, SchedulerSnapshot};
pub use state::SchedulerState;

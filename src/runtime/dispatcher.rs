//! The boundary between the scheduler and whatever actually runs tasks.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::{ReconcileAction, SchedulerError, TaskUpdate};
use crate::util::types::{RequestId, WorkerId};

/// Remote task dispatcher.
///
/// Implementations talk to the system that owns the workers. They are called
/// without the scheduler lock held.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Task state changes observed since the previous call.
    async fn task_updates(&self) -> Result<Vec<TaskUpdate>, SchedulerError> {
        Ok(Vec::new())
    }

    /// Which request each busy worker is running right now.
    async fn observed_bindings(&self) -> Result<BTreeMap<WorkerId, RequestId>, SchedulerError>;

    /// Deliver one reconcile action.
    async fn send(&self, action: ReconcileAction) -> Result<(), SchedulerError>;
}

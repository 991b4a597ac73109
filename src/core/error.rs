//! Error types for scheduler operations.

use thiserror::Error;

use crate::util::types::{AccountId, Timestamp};

/// Errors produced by scheduler components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    /// The caller's view of state diverged from the scheduler's: a mutation
    /// referenced a missing worker or request, assigned a busy worker, or
    /// preempted an idle one. The enclosing pass is aborted unapplied.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// Time was moved backwards.
    #[error("update time {next} is older than state time {previous}")]
    UpdateOrder {
        /// Time already recorded in the state.
        previous: Timestamp,
        /// Rejected update time.
        next: Timestamp,
    },
    /// Malformed input, such as an empty identifier.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Operation targeted an account that does not exist.
    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),
    /// Configuration failed validation.
    #[error("config invalid: {0}")]
    Config(String),
    /// Snapshot could not be encoded or decoded.
    #[error("snapshot error: {0}")]
    Snapshot(String),
    /// Dispatcher-side failure with context.
    #[error("dispatcher error: {0}")]
    Dispatcher(String),
}

impl SchedulerError {
    /// Build an [`SchedulerError::InvariantViolation`].
    pub fn violation(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// True for contract violations, which callers must treat as fatal.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

//! Async plumbing between a shared scheduler and a remote dispatcher.

pub mod dispatcher;
#[cfg(feature = "tokio-runtime")]
pub mod service;

pub use dispatcher::Dispatcher;
#[cfg(feature = "tokio-runtime")]
pub use service::{ReconcileService, TickReport};

//! Configuration models for the scheduler and its quota accounts.

pub mod scheduler;

pub use scheduler::{AccountConfig, SchedulerConfig, CONFIG_PATH_ENV};

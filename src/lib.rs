//! # Quota Scheduler
//!
//! A quota-based preemptive task scheduler for a fleet of labeled workers.
//!
//! Accounts hold a per-tier quota balance that recharges over time and is
//! spent by the tasks they run. Each scheduling pass admits pending requests
//! at the most privileged tier their account can fund, matches them to
//! workers that carry every required label, and lets higher tiers preempt
//! cheaper lower-tier work. Requests from accounts with no quota still run,
//! best-effort, in the free bucket.
//!
//! ## Key Features
//!
//! - **Multi-tier quota**: balances are cost vectors, one slot per tier,
//!   compared lexicographically from the most privileged tier
//! - **Label matching**: required labels gate placement; provisionable labels
//!   steer it
//! - **Zero-sum preemption**: the preempting account inherits the displaced
//!   run's cost, and the displaced account is refunded
//! - **Fanout throttling** and demotion/promotion of running work by balance
//! - **Atomic passes**: a failed pass leaves state and event sink untouched
//! - **Reconciliation** of intended bindings against what the dispatcher
//!   observes, with an optional tokio service driving it
//!
//! ## Quick Start
//!
//! ```rust
//! use quota_scheduler::config::{AccountConfig, SchedulerConfig};
//! use quota_scheduler::core::{CostVector, InMemoryEventSink, Scheduler, TaskRequest};
//! use quota_scheduler::util::labels;
//!
//! let mut scheduler = Scheduler::new(SchedulerConfig::with_priorities(2), 0).unwrap();
//! scheduler
//!     .add_account("team-a", AccountConfig::new(vec![1.0, 1.0], 60.0, 0), CostVector::from(vec![10.0, 0.0]))
//!     .unwrap();
//!
//! let mut events = InMemoryEventSink::new(128);
//! scheduler.mark_idle("w1", labels(["linux"]), 0, &mut events).unwrap();
//! scheduler
//!     .add_request(TaskRequest::new("r1", "team-a", labels(["linux"]), 0), 0, &mut events)
//!     .unwrap();
//!
//! let mutations = scheduler.run_once(0, &mut events).unwrap();
//! assert_eq!(mutations.len(), 1);
//! assert!(scheduler.is_assigned("r1", "w1"));
//! ```
//!
//! For shared use across threads see [`core::SchedulerHandle`]; for the
//! dispatcher loop see [`runtime`].

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: cost vectors, state, passes, reconciliation.
pub mod core;
/// Configuration models for the scheduler and its accounts.
pub mod config;
/// Async plumbing between a shared scheduler and a remote dispatcher.
pub mod runtime;
/// Shared utilities.
pub mod util;

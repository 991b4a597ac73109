//! Wall-clock helpers.
//!
//! The scheduler core never reads the clock itself; callers pass `now` into
//! every operation. These helpers are for the surrounding service.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::util::types::Timestamp;

/// Current time in milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock is set before the epoch.
#[must_use]
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Seconds elapsed between two millisecond timestamps, saturating at zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn elapsed_secs(from: Timestamp, to: Timestamp) -> f64 {
    to.saturating_sub(from) as f64 / 1000.0
}

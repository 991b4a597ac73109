//! Identifier and label types shared across the scheduler.

use std::collections::BTreeSet;

/// Identifies a quota account.
pub type AccountId = String;

/// Identifies a worker.
pub type WorkerId = String;

/// Identifies a task request.
pub type RequestId = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Priority tier. Lower values are more privileged; tier 0 is the highest.
///
/// With `N` funded tiers configured, tier `N` is the free bucket.
pub type Priority = usize;

/// Ordered set of capability labels.
pub type LabelSet = BTreeSet<String>;

/// Build a [`LabelSet`] from anything that yields string-like items.
pub fn labels<I, S>(items: I) -> LabelSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

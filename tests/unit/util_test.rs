//! Tests for utility functions

use quota_scheduler::util::{elapsed_secs, init_tracing, labels, now_ms, LabelSet};

#[test]
fn test_labels_builds_ordered_set() {
    let set = labels(["pool:b", "os:linux", "pool:b"]);
    assert_eq!(set.len(), 2);
    let ordered: Vec<&str> = set.iter().map(String::as_str).collect();
    assert_eq!(ordered, vec!["os:linux", "pool:b"]);
    assert!(LabelSet::new().is_subset(&set));
}

#[test]
fn test_elapsed_secs() {
    assert!((elapsed_secs(1_000, 3_500) - 2.5).abs() < f64::EPSILON);
    // Saturates instead of going negative.
    assert!(elapsed_secs(5_000, 1_000).abs() < f64::EPSILON);
}

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(a > 0);
    assert!(b >= a);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}

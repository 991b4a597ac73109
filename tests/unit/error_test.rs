//! Tests for error types

use quota_scheduler::core::SchedulerError;

#[test]
fn test_invariant_violation_error() {
    let err = SchedulerError::violation("unknown worker w1");
    assert_eq!(format!("{}", err), "invariant violation: unknown worker w1");
    assert!(err.is_invariant_violation());
}

#[test]
fn test_update_order_error() {
    let err = SchedulerError::UpdateOrder {
        previous: 2000,
        next: 1000,
    };
    assert_eq!(
        format!("{}", err),
        "update time 1000 is older than state time 2000"
    );
    assert!(!err.is_invariant_violation());
}

#[test]
fn test_unknown_account_error() {
    let err = SchedulerError::UnknownAccount("team-a".to_string());
    assert_eq!(format!("{}", err), "unknown account: team-a");
}

#[test]
fn test_invalid_request_error() {
    let err = SchedulerError::InvalidRequest("empty request id".to_string());
    assert_eq!(format!("{}", err), "invalid request: empty request id");
}

#[test]
fn test_errors_convert_into_anyhow() {
    let result: quota_scheduler::core::AppResult<()> =
        Err(SchedulerError::Config("priorities must be greater than 0".into()).into());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("config invalid"));
    assert!(err.downcast_ref::<SchedulerError>().is_some());
}

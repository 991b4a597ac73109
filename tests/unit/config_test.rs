//! Tests for configuration validation

use std::io::Write;

use quota_scheduler::config::{AccountConfig, SchedulerConfig};

fn valid_account() -> AccountConfig {
    AccountConfig::new(vec![1.0, 0.5, 0.0], 3600.0, 4)
}

#[test]
fn test_default_config_is_valid() {
    let cfg = SchedulerConfig::default();
    assert_eq!(cfg.priorities, 3);
    assert_eq!(cfg.free_bucket(), 3);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_zero_priorities_invalid() {
    let cfg = SchedulerConfig::with_priorities(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_inverted_thresholds_invalid() {
    let mut cfg = SchedulerConfig::default();
    cfg.promote_threshold = -10.0;
    cfg.demote_threshold = 10.0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_account_validation() {
    assert!(valid_account().validate(3).is_ok());

    let too_many_tiers = AccountConfig::new(vec![1.0; 4], 60.0, 0);
    assert!(too_many_tiers.validate(3).is_err());

    let negative_rate = AccountConfig::new(vec![-1.0], 60.0, 0);
    assert!(negative_rate.validate(3).is_err());

    let bad_window = AccountConfig::new(vec![1.0], f64::NAN, 0);
    assert!(bad_window.validate(3).is_err());
}

#[test]
fn test_invalid_account_names_the_account() {
    let mut cfg = SchedulerConfig::default();
    cfg.accounts
        .insert("broken".into(), AccountConfig::new(vec![-1.0], 60.0, 0));
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("broken"));
}

#[test]
fn test_rate_at_defaults_to_zero() {
    let account = valid_account();
    assert!((account.rate_at(1) - 0.5).abs() < f64::EPSILON);
    assert!(account.rate_at(7).abs() < f64::EPSILON);
}

#[test]
fn test_config_from_json_with_defaults() {
    let json = r#"{
        "priorities": 2,
        "accounts": {
            "team-a": { "charge_rate": [1.0, 2.0], "max_charge_seconds": 60.0, "max_fanout": 3 },
            "team-b": { "disable_free_tasks": true }
        }
    }"#;
    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.priorities, 2);
    assert!(!cfg.disable_preemption);
    assert!((cfg.promote_threshold - 300.0).abs() < f64::EPSILON);
    assert_eq!(cfg.accounts["team-a"].max_fanout, 3);
    assert!(cfg.accounts["team-b"].disable_free_tasks);
    assert!(cfg.accounts["team-b"].charge_rate.is_empty());
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str("{ not json").is_err());
    assert!(SchedulerConfig::from_json_str(r#"{"priorities": 0}"#).is_err());
}

#[test]
fn test_config_from_json_file() {
    let path = std::env::temp_dir().join(format!(
        "quota_scheduler_config_{}.json",
        std::process::id()
    ));
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, r#"{{"priorities": 4, "disable_preemption": true}}"#).unwrap();
    drop(file);

    let cfg = SchedulerConfig::from_json_file(&path).unwrap();
    assert_eq!(cfg.priorities, 4);
    assert!(cfg.disable_preemption);
    std::fs::remove_file(&path).unwrap();

    let missing = SchedulerConfig::from_json_file(&path).unwrap_err();
    assert!(missing.to_string().contains("reading scheduler config"));
}

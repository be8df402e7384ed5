//! Integration tests for suspicious-activity detection.

mod common;

use chrono::{Duration, Timelike, Utc};
use custos_types::AnomalyConfig;

use common::{login_failure_event, login_success_event, open_test_store, temp_db, view_event};

#[test]
fn test_four_failed_logins_form_a_cluster() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    for _ in 0..4 {
        store.append(&login_failure_event("u1")).expect("append");
    }
    store.append(&login_success_event("u2")).expect("append");

    let report = store
        .detect_suspicious_activity(&AnomalyConfig::default(), Duration::minutes(5))
        .expect("detect");

    assert_eq!(report.failed_logins.len(), 1);
    assert_eq!(report.failed_logins[0].actor_id, "u1");
    assert_eq!(report.failed_logins[0].count, 4);
}

#[test]
fn test_two_actors_cluster_independently() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    for _ in 0..3 {
        store.append(&login_failure_event("u1")).unwrap();
        store.append(&login_failure_event("u2")).unwrap();
    }
    store.append(&login_failure_event("u3")).unwrap();

    let report = store
        .detect_suspicious_activity(&AnomalyConfig::default(), Duration::minutes(5))
        .expect("detect");

    let actors: Vec<&str> = report
        .failed_logins
        .iter()
        .map(|c| c.actor_id.as_str())
        .collect();
    assert_eq!(actors, vec!["u1", "u2"]);
}

#[test]
fn test_access_at_two_am_local_is_after_hours() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    let entry = store.append(&view_event("u1", "p1")).expect("append");

    // Choose a business-calendar offset that puts the entry at 02:00
    // local, regardless of the UTC wall clock the test runs at.
    let minute_of_day = (entry.timestamp.hour() * 60 + entry.timestamp.minute()) as i32;
    let config = AnomalyConfig {
        business_utc_offset_minutes: 2 * 60 - minute_of_day,
        ..Default::default()
    };

    let report = store
        .detect_suspicious_activity(&config, Duration::hours(1))
        .expect("detect");

    assert_eq!(report.after_hours_access.len(), 1);
    assert_eq!(report.after_hours_access[0].local_hour, 2);
    assert_eq!(report.after_hours_access[0].entry.sequence, entry.sequence);
}

#[test]
fn test_mid_morning_access_is_not_flagged() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    let entry = store.append(&view_event("u1", "p1")).expect("append");

    let minute_of_day = (entry.timestamp.hour() * 60 + entry.timestamp.minute()) as i32;
    let config = AnomalyConfig {
        business_utc_offset_minutes: 10 * 60 - minute_of_day,
        ..Default::default()
    };

    let report = store
        .detect_suspicious_activity(&config, Duration::hours(1))
        .expect("detect");
    assert!(report.after_hours_access.is_empty());
}

#[test]
fn test_checks_are_additive_entry_can_appear_twice() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    for _ in 0..3 {
        store.append(&login_failure_event("u1")).unwrap();
    }
    let last = store.append(&login_failure_event("u1")).unwrap();

    // Force all entries after-hours via the business offset.
    let minute_of_day = (last.timestamp.hour() * 60 + last.timestamp.minute()) as i32;
    let config = AnomalyConfig {
        business_utc_offset_minutes: 3 * 60 - minute_of_day,
        ..Default::default()
    };

    let report = store
        .detect_suspicious_activity(&config, Duration::minutes(5))
        .expect("detect");

    assert_eq!(report.failed_logins.len(), 1);
    assert_eq!(report.failed_logins[0].count, 4);
    assert_eq!(report.after_hours_access.len(), 4);
}

#[test]
fn test_detection_is_deterministic_for_fixed_as_of() {
    let tmp = temp_db();
    let mut store = open_test_store(&tmp);

    for _ in 0..4 {
        store.append(&login_failure_event("u1")).unwrap();
    }
    store.append(&view_event("u2", "p1")).unwrap();

    let as_of = Utc::now();
    let config = AnomalyConfig::default();
    let r1 = store
        .detect_suspicious_activity_at(&config, as_of, Duration::hours(1))
        .expect("first pass");
    let r2 = store
        .detect_suspicious_activity_at(&config, as_of, Duration::hours(1))
        .expect("second pass");

    assert_eq!(
        serde_json::to_string(&r1).unwrap(),
        serde_json::to_string(&r2).unwrap()
    );
}

#[test]
fn test_empty_ledger_yields_no_flags() {
    let tmp = temp_db();
    let store = open_test_store(&tmp);

    let report = store
        .detect_suspicious_activity(&AnomalyConfig::default(), Duration::hours(24))
        .expect("detect");
    assert!(report.failed_logins.is_empty());
    assert!(report.after_hours_access.is_empty());
    assert!(report.unusual_patterns.is_empty());
}

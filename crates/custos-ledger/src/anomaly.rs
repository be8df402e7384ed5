//! Suspicious-activity detection over a time window of audit entries.
//!
//! Three independent heuristics: failed-login clusters, after-hours
//! access, and per-actor volume spikes against a trailing historical
//! rate. Deliberately simple rules rather than a learned model, so a
//! compliance officer can re-derive every flag from the entries alone.
//! All checks are read-only and deterministic for a fixed `as_of`,
//! window, and ledger state; an entry may appear in more than one
//! category.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Offset, Timelike, Utc};
use rusqlite::params;
use serde::Serialize;

use custos_types::{AnomalyConfig, AuditAction, LedgerError};

use crate::entry::AuditEntry;
use crate::query::row_to_entry;
use crate::store::AuditStore;

/// Trailing window, in hours, scanned when the caller does not pick one.
pub const DEFAULT_DETECTION_WINDOW_HOURS: i64 = 24;

/// An actor whose failed-login count within the window reached the
/// configured threshold.
#[derive(Debug, Clone, Serialize)]
pub struct FailedLoginCluster {
    pub actor_id: String,
    pub count: usize,
    /// The offending `login_failure` entries, in sequence order.
    pub entries: Vec<AuditEntry>,
}

/// An entry whose timestamp falls outside the business-hours window.
#[derive(Debug, Clone, Serialize)]
pub struct AfterHoursAccess {
    /// Hour of day (0-23) in the deployment's business calendar.
    pub local_hour: u32,
    pub entry: AuditEntry,
}

/// An actor whose window activity exceeds the configured multiple of
/// their trailing historical per-window rate.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeSpike {
    pub actor_id: String,
    pub window_count: usize,
    /// The actor's historical entries per window-length, before the window.
    pub baseline_per_window: f64,
}

/// Structured flags from one detection pass. These are findings for a
/// dashboard or periodic job; alerting is the caller's concern.
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousActivity {
    pub window_start: DateTime<Utc>,
    pub as_of: DateTime<Utc>,
    pub failed_logins: Vec<FailedLoginCluster>,
    pub after_hours_access: Vec<AfterHoursAccess>,
    pub unusual_patterns: Vec<VolumeSpike>,
}

impl AuditStore {
    /// Scan the trailing default window
    /// ([`DEFAULT_DETECTION_WINDOW_HOURS`]) ending now for suspicious
    /// activity. Periodic jobs that have no reason to choose a window
    /// use this.
    pub fn detect_recent_suspicious_activity(
        &self,
        config: &AnomalyConfig,
    ) -> Result<SuspiciousActivity, LedgerError> {
        self.detect_suspicious_activity(config, Duration::hours(DEFAULT_DETECTION_WINDOW_HOURS))
    }

    /// Scan the trailing `window` ending now for suspicious activity.
    pub fn detect_suspicious_activity(
        &self,
        config: &AnomalyConfig,
        window: Duration,
    ) -> Result<SuspiciousActivity, LedgerError> {
        self.detect_suspicious_activity_at(config, Utc::now(), window)
    }

    /// Scan the window `(as_of - window, as_of]` for suspicious activity.
    ///
    /// The explicit `as_of` keeps results reproducible: the same instant,
    /// window, and ledger state always yield the same flags.
    pub fn detect_suspicious_activity_at(
        &self,
        config: &AnomalyConfig,
        as_of: DateTime<Utc>,
        window: Duration,
    ) -> Result<SuspiciousActivity, LedgerError> {
        if window <= Duration::zero() {
            return Err(LedgerError::InvalidQuery(
                "detection window must be positive".into(),
            ));
        }
        let window_start = as_of - window;
        let entries = self.window_entries(window_start, as_of)?;

        Ok(SuspiciousActivity {
            window_start,
            as_of,
            failed_logins: failed_login_clusters(&entries, config),
            after_hours_access: after_hours_entries(&entries, config),
            unusual_patterns: self.volume_spikes(&entries, config, window_start, window)?,
        })
    }

    fn window_entries(
        &self,
        window_start: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, LedgerError> {
        let mut stmt = self
            .connection()
            .prepare(
                "SELECT sequence, timestamp, actor_id, actor_role, action, entity_type, entity_id, patient_id, details, prev_hash, hash
                 FROM audit_ledger WHERE timestamp > ?1 AND timestamp <= ?2 ORDER BY sequence ASC",
            )
            .map_err(|e| LedgerError::Storage(format!("window query prepare failed: {e}")))?;

        let rows = stmt
            .query_map(
                params![window_start.to_rfc3339(), as_of.to_rfc3339()],
                row_to_entry,
            )
            .map_err(|e| LedgerError::Storage(format!("window query failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Storage(format!("window query read failed: {e}")))
    }

    /// Compare each actor's window count against their trailing rate.
    ///
    /// The baseline is the actor's entry count before the window divided
    /// by the number of window-lengths their history spans (floored at
    /// one window). Actors with no prior history are never flagged; a
    /// first-day account has no rate to spike against.
    fn volume_spikes(
        &self,
        window_entries: &[AuditEntry],
        config: &AnomalyConfig,
        window_start: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<VolumeSpike>, LedgerError> {
        let mut window_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in window_entries {
            *window_counts.entry(entry.actor_id.as_str()).or_insert(0) += 1;
        }

        let window_secs = window.num_seconds().max(1) as f64;
        let mut spikes = Vec::new();

        for (actor_id, window_count) in window_counts {
            let (history_count, first_seen) = self.actor_history_before(actor_id, window_start)?;
            if history_count == 0 {
                continue;
            }
            let first_seen = first_seen.unwrap_or(window_start);
            let history_secs = (window_start - first_seen).num_seconds().max(0) as f64;
            let history_windows = (history_secs / window_secs).max(1.0);
            let baseline = history_count as f64 / history_windows;

            if window_count as f64 > config.volume_spike_multiplier * baseline {
                spikes.push(VolumeSpike {
                    actor_id: actor_id.to_string(),
                    window_count,
                    baseline_per_window: baseline,
                });
            }
        }

        Ok(spikes)
    }

    fn actor_history_before(
        &self,
        actor_id: &str,
        before: DateTime<Utc>,
    ) -> Result<(usize, Option<DateTime<Utc>>), LedgerError> {
        self.connection()
            .query_row(
                "SELECT COUNT(*), MIN(timestamp) FROM audit_ledger
                 WHERE actor_id = ?1 AND timestamp <= ?2",
                params![actor_id, before.to_rfc3339()],
                |row| {
                    let count: i64 = row.get(0)?;
                    let first: Option<String> = row.get(1)?;
                    Ok((count as usize, first))
                },
            )
            .map(|(count, first)| {
                let first = first
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(Into::into);
                (count, first)
            })
            .map_err(|e| LedgerError::Storage(format!("actor history query failed: {e}")))
    }
}

/// Group `login_failure` entries by actor and keep clusters at or above
/// the configured threshold, ordered by actor id.
fn failed_login_clusters(
    entries: &[AuditEntry],
    config: &AnomalyConfig,
) -> Vec<FailedLoginCluster> {
    let mut by_actor: BTreeMap<&str, Vec<&AuditEntry>> = BTreeMap::new();
    for entry in entries {
        if entry.action == AuditAction::LoginFailure {
            by_actor.entry(entry.actor_id.as_str()).or_default().push(entry);
        }
    }

    by_actor
        .into_iter()
        .filter(|(_, failures)| failures.len() >= config.failed_login_threshold)
        .map(|(actor_id, failures)| FailedLoginCluster {
            actor_id: actor_id.to_string(),
            count: failures.len(),
            entries: failures.into_iter().cloned().collect(),
        })
        .collect()
}

/// Flag every window entry outside the business-hours window, with the
/// computed local hour.
fn after_hours_entries(entries: &[AuditEntry], config: &AnomalyConfig) -> Vec<AfterHoursAccess> {
    entries
        .iter()
        .filter_map(|entry| {
            let hour = business_local_hour(&entry.timestamp, config.business_utc_offset_minutes);
            if is_after_hours(hour, config) {
                Some(AfterHoursAccess {
                    local_hour: hour,
                    entry: entry.clone(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Convert a UTC timestamp to the business calendar's hour of day.
fn business_local_hour(timestamp: &DateTime<Utc>, offset_minutes: i32) -> u32 {
    let offset = chrono::FixedOffset::east_opt(offset_minutes * 60)
        .unwrap_or_else(|| Utc.fix());
    timestamp.with_timezone(&offset).hour()
}

/// Whether the local hour falls outside `[start, end)`.
///
/// A window with `start > end` spans midnight (e.g., a 22:00-06:00
/// overnight intake desk).
fn is_after_hours(hour: u32, config: &AnomalyConfig) -> bool {
    let (start, end) = (config.business_hours_start, config.business_hours_end);
    if start <= end {
        hour < start || hour >= end
    } else {
        hour < start && hour >= end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custos_types::AuditEvent;
    use tempfile::NamedTempFile;

    fn test_db() -> (NamedTempFile, AuditStore) {
        let tmp = NamedTempFile::new().unwrap();
        let store = AuditStore::open(tmp.path()).unwrap();
        (tmp, store)
    }

    fn login_failure(actor: &str) -> AuditEvent {
        AuditEvent::new(actor, "staff", AuditAction::LoginFailure, "account", actor)
    }

    #[test]
    fn default_hours_flag_night_access() {
        let config = AnomalyConfig::default();
        assert!(is_after_hours(2, &config));
        assert!(is_after_hours(6, &config));
        assert!(!is_after_hours(7, &config));
        assert!(!is_after_hours(18, &config));
        assert!(is_after_hours(19, &config));
        assert!(is_after_hours(23, &config));
    }

    #[test]
    fn overnight_window_flags_daytime() {
        let config = AnomalyConfig {
            business_hours_start: 22,
            business_hours_end: 6,
            ..Default::default()
        };
        assert!(!is_after_hours(23, &config));
        assert!(!is_after_hours(2, &config));
        assert!(is_after_hours(12, &config));
        assert!(is_after_hours(21, &config));
    }

    #[test]
    fn business_local_hour_applies_offset() {
        let ts: DateTime<Utc> = "2026-03-01T01:30:00Z".parse().unwrap();
        assert_eq!(business_local_hour(&ts, 0), 1);
        assert_eq!(business_local_hour(&ts, -300), 20); // UTC-5
        assert_eq!(business_local_hour(&ts, 120), 3); // UTC+2
    }

    #[test]
    fn failed_login_cluster_at_threshold() {
        let (_tmp, mut store) = test_db();
        for _ in 0..4 {
            store.append(&login_failure("u1")).unwrap();
        }
        store.append(&login_failure("u2")).unwrap();

        let report = store
            .detect_suspicious_activity(&AnomalyConfig::default(), Duration::minutes(5))
            .unwrap();

        assert_eq!(report.failed_logins.len(), 1);
        let cluster = &report.failed_logins[0];
        assert_eq!(cluster.actor_id, "u1");
        assert_eq!(cluster.count, 4);
        assert_eq!(cluster.entries.len(), 4);
    }

    #[test]
    fn below_threshold_actor_is_not_flagged() {
        let (_tmp, mut store) = test_db();
        store.append(&login_failure("u1")).unwrap();
        store.append(&login_failure("u1")).unwrap();

        let report = store
            .detect_suspicious_activity(&AnomalyConfig::default(), Duration::minutes(5))
            .unwrap();
        assert!(report.failed_logins.is_empty());
    }

    #[test]
    fn entries_outside_window_are_ignored() {
        let (_tmp, mut store) = test_db();
        for _ in 0..3 {
            store.append(&login_failure("u1")).unwrap();
        }
        // Push the first failure out of the window; detection only reads
        // timestamps, so the (now broken) hash does not matter here.
        store
            .connection()
            .execute(
                "UPDATE audit_ledger SET timestamp = '2000-01-01T00:00:00+00:00' WHERE sequence = 0",
                [],
            )
            .unwrap();

        let report = store
            .detect_suspicious_activity(&AnomalyConfig::default(), Duration::minutes(5))
            .unwrap();
        assert!(report.failed_logins.is_empty());
    }

    #[test]
    fn volume_spike_against_trailing_baseline() {
        let (_tmp, mut store) = test_db();

        // 40 entries in the window for a spiking actor, 1 for a quiet one.
        for i in 0..40 {
            store
                .append(&AuditEvent::new(
                    "spiker",
                    "staff",
                    AuditAction::View,
                    "chart",
                    format!("c-{i}"),
                ))
                .unwrap();
        }
        store
            .append(&AuditEvent::new("quiet", "staff", AuditAction::View, "chart", "c-q"))
            .unwrap();

        // History: the spiker averaged well under one entry per day, the
        // quiet actor about one per day. Backdating touches timestamps
        // only; detection never reads the (now broken) hashes.
        store
            .append(&AuditEvent::new("spiker", "staff", AuditAction::View, "chart", "c-old"))
            .unwrap();
        for i in 0..30 {
            store
                .append(&AuditEvent::new(
                    "quiet",
                    "staff",
                    AuditAction::View,
                    "chart",
                    format!("c-old-{i}"),
                ))
                .unwrap();
        }
        let month_ago = (Utc::now() - Duration::days(30)).to_rfc3339();
        store
            .connection()
            .execute(
                "UPDATE audit_ledger SET timestamp = ?1 WHERE entity_id LIKE 'c-old%'",
                params![month_ago],
            )
            .unwrap();

        let as_of = Utc::now();
        let report = store
            .detect_suspicious_activity_at(&AnomalyConfig::default(), as_of, Duration::days(1))
            .unwrap();

        let flagged: Vec<&str> = report
            .unusual_patterns
            .iter()
            .map(|s| s.actor_id.as_str())
            .collect();
        assert!(flagged.contains(&"spiker"), "flagged: {flagged:?}");
        assert!(!flagged.contains(&"quiet"));
    }

    #[test]
    fn actor_without_history_is_never_flagged() {
        let (_tmp, mut store) = test_db();
        for i in 0..50 {
            store
                .append(&AuditEvent::new(
                    "new-hire",
                    "staff",
                    AuditAction::View,
                    "chart",
                    format!("c-{i}"),
                ))
                .unwrap();
        }

        let report = store
            .detect_suspicious_activity(&AnomalyConfig::default(), Duration::hours(1))
            .unwrap();
        assert!(report.unusual_patterns.is_empty());
    }

    #[test]
    fn default_window_covers_recent_activity() {
        let (_tmp, mut store) = test_db();
        for _ in 0..3 {
            store.append(&login_failure("u1")).unwrap();
        }

        let report = store
            .detect_recent_suspicious_activity(&AnomalyConfig::default())
            .unwrap();
        assert_eq!(report.failed_logins.len(), 1);
        assert_eq!(report.as_of - report.window_start, Duration::hours(24));
    }

    #[test]
    fn zero_window_is_rejected() {
        let (_tmp, store) = test_db();
        assert!(matches!(
            store.detect_suspicious_activity(&AnomalyConfig::default(), Duration::zero()),
            Err(LedgerError::InvalidQuery(_))
        ));
    }
}

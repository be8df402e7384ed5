//! Anomaly-detection configuration.

use serde::{Deserialize, Serialize};

/// Thresholds for the suspicious-activity heuristics.
///
/// These are deployment configuration, not constants: a clinic that runs
/// a 24-hour intake desk will want a different business-hours window than
/// a nine-to-five practice. The defaults match the documented contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Minimum `login_failure` count per actor within the window before
    /// the actor is flagged as a failed-login cluster.
    pub failed_login_threshold: usize,
    /// First hour (inclusive, 0-23) of the local business-hours window.
    pub business_hours_start: u32,
    /// End hour (exclusive, 0-23) of the local business-hours window.
    pub business_hours_end: u32,
    /// An actor is flagged when their window entry count exceeds this
    /// multiple of their trailing historical per-window rate.
    pub volume_spike_multiplier: f64,
    /// Offset from UTC, in minutes, of the deployment's business calendar.
    pub business_utc_offset_minutes: i32,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            failed_login_threshold: 3,
            business_hours_start: 7,
            business_hours_end: 19,
            volume_spike_multiplier: 5.0,
            business_utc_offset_minutes: 0,
        }
    }
}

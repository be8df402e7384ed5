//! Aggregate compliance reports over a date range.
//!
//! A report carries the matching entries, per-action/per-actor/per-patient
//! totals, and an integrity attestation over the FULL ledger (not just the
//! reported range), so a report can never be presented without one.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use serde::Serialize;

use custos_types::LedgerError;

use crate::entry::AuditEntry;
use crate::integrity::IntegrityReport;
use crate::store::AuditStore;

/// An audit report over `start <= timestamp < end`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// The matching entries, in sequence order.
    pub entries: Vec<AuditEntry>,
    pub totals_by_action: BTreeMap<String, usize>,
    pub totals_by_actor: BTreeMap<String, usize>,
    pub totals_by_patient: BTreeMap<String, usize>,
    /// Full-ledger chain attestation computed alongside the totals.
    pub integrity: IntegrityReport,
}

impl AuditStore {
    /// Generate an audit report for `start <= timestamp < end`.
    pub fn generate_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AuditReport, LedgerError> {
        self.generate_report_with(start, end, None)
    }

    /// Generate an audit report, optionally cancellable.
    ///
    /// The cancel token is forwarded to the embedded full-ledger
    /// verification; a cancelled report carries an attestation with
    /// `complete: false`.
    pub fn generate_report_with(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: Option<&AtomicBool>,
    ) -> Result<AuditReport, LedgerError> {
        if start >= end {
            return Err(LedgerError::InvalidRange(format!(
                "start {start} is not before end {end}"
            )));
        }

        let entries = self.entries_in_range(start, end)?;

        let mut totals_by_action: BTreeMap<String, usize> = BTreeMap::new();
        let mut totals_by_actor: BTreeMap<String, usize> = BTreeMap::new();
        let mut totals_by_patient: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &entries {
            *totals_by_action
                .entry(entry.action.as_str().to_string())
                .or_insert(0) += 1;
            *totals_by_actor.entry(entry.actor_id.clone()).or_insert(0) += 1;
            if let Some(patient_id) = &entry.patient_id {
                *totals_by_patient.entry(patient_id.clone()).or_insert(0) += 1;
            }
        }

        let integrity = self.verify_integrity_range(None, cancel)?;

        Ok(AuditReport {
            start,
            end,
            entries,
            totals_by_action,
            totals_by_actor,
            totals_by_patient,
            integrity,
        })
    }
}

impl AuditReport {
    /// Total number of entries inside the reported range.
    pub fn total_entries(&self) -> usize {
        self.entries.len()
    }

    /// Render the report as a human-readable compliance summary.
    ///
    /// Machine consumers should use the `Serialize` impl instead.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Audit report {} .. {}", self.start, self.end);
        let _ = writeln!(out, "Entries in range: {}", self.entries.len());

        let _ = writeln!(out, "\nBy action:");
        for (action, count) in &self.totals_by_action {
            let _ = writeln!(out, "  {action:<15} {count}");
        }
        let _ = writeln!(out, "\nBy actor:");
        for (actor, count) in &self.totals_by_actor {
            let _ = writeln!(out, "  {actor:<15} {count}");
        }
        let _ = writeln!(out, "\nBy patient:");
        for (patient, count) in &self.totals_by_patient {
            let _ = writeln!(out, "  {patient:<15} {count}");
        }

        let verdict = if !self.integrity.complete {
            "INCOMPLETE (verification cancelled)"
        } else if self.integrity.valid {
            "VALID"
        } else {
            "BROKEN"
        };
        let _ = writeln!(out, "\nChain integrity: {verdict} ({})", self.integrity.message);
        out
    }
}

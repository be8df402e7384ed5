//! AuditEntry: a single hash-chained audit log entry.
//!
//! Each entry records one access to a protected record, linked to the
//! previous entry via `prev_hash` to form a tamper-evident chain. Entries
//! are created exactly once, by the ledger at append time, and are never
//! mutated or deleted through the public contract.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use custos_types::{AuditAction, AuditEvent};

/// The sentinel value used as `prev_hash` for the very first entry.
pub const GENESIS_HASH: &str = "genesis";

/// Version tag for the canonical hash input.
///
/// Hashed as the first field of every entry. If the canonical field order
/// or encoding ever changes, this tag must change with it so old entries
/// remain verifiable under their original scheme.
pub const HASH_SCHEMA_VERSION: &str = "custos-v1";

/// A single entry in the append-only audit ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Strictly increasing, gap-free, assigned at append time. Defines
    /// the total order of the ledger.
    pub sequence: u64,
    /// Assigned by the ledger at append time, never caller-supplied.
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub actor_role: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub patient_id: Option<String>,
    pub details: Option<serde_json::Value>,
    /// Hash of the immediately preceding entry, or [`GENESIS_HASH`].
    pub prev_hash: String,
    /// SHA-256 over the canonical serialization of all other fields.
    pub hash: String,
}

impl AuditEntry {
    /// Create a new entry from an event, its assigned position, and the
    /// previous entry's hash.
    ///
    /// Sequence and timestamp participate in the hash, so two entries with
    /// otherwise identical fields still produce distinct hashes.
    pub fn new(
        sequence: u64,
        timestamp: DateTime<Utc>,
        event: &AuditEvent,
        prev_hash: String,
    ) -> Self {
        let hash = compute_hash(
            sequence,
            &timestamp.to_rfc3339(),
            &event.actor_id,
            &event.actor_role,
            event.action.as_str(),
            &event.entity_type,
            &event.entity_id,
            event.patient_id.as_deref(),
            canonical_details(event.details.as_ref()).as_deref(),
            &prev_hash,
        );

        Self {
            sequence,
            timestamp,
            actor_id: event.actor_id.clone(),
            actor_role: event.actor_role.clone(),
            action: event.action,
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id.clone(),
            patient_id: event.patient_id.clone(),
            details: event.details.clone(),
            prev_hash,
            hash,
        }
    }

    /// Recompute this entry's hash from its fields.
    ///
    /// Compare the result against `self.hash` to detect tampering.
    pub fn recompute_hash(&self) -> String {
        compute_hash(
            self.sequence,
            &self.timestamp.to_rfc3339(),
            &self.actor_id,
            &self.actor_role,
            self.action.as_str(),
            &self.entity_type,
            &self.entity_id,
            self.patient_id.as_deref(),
            canonical_details(self.details.as_ref()).as_deref(),
            &self.prev_hash,
        )
    }
}

/// Serialize a details payload to its canonical stored form.
///
/// `serde_json` object keys are sorted, so the same payload always
/// serializes to the same string. The stored column holds exactly this
/// string, and the hash covers it byte for byte.
pub(crate) fn canonical_details(details: Option<&serde_json::Value>) -> Option<String> {
    details.map(|v| v.to_string())
}

/// Compute the SHA-256 chain hash over the canonical field serialization.
///
/// Field order and encoding are fixed; [`HASH_SCHEMA_VERSION`] gates any
/// future change. Operates on the stored string forms so that integrity
/// verification can hash rows byte-faithfully without reparsing.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_hash(
    sequence: u64,
    timestamp_rfc3339: &str,
    actor_id: &str,
    actor_role: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    patient_id: Option<&str>,
    details: Option<&str>,
    prev_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(HASH_SCHEMA_VERSION);
    hasher.update(sequence.to_string());
    hasher.update(timestamp_rfc3339);
    hasher.update(actor_id);
    hasher.update(actor_role);
    hasher.update(action);
    hasher.update(entity_type);
    hasher.update(entity_id);
    hasher.update(patient_id.unwrap_or(""));
    hasher.update(details.unwrap_or(""));
    hasher.update(prev_hash);
    hex::encode(hasher.finalize())
}

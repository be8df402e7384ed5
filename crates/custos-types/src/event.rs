//! Audit events submitted to the ledger.
//!
//! An [`AuditEvent`] pairs an actor with an [`AuditAction`] and the entity
//! acted on, and is the sole input to `AuditStore::append`. The ledger
//! assigns sequence numbers and timestamps itself; callers never supply
//! them, which prevents backdating.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Top-level `details` keys that are reserved for the hash chain.
///
/// Caller payloads containing these keys are rejected so a forged entry
/// cannot smuggle chain fields through the opaque payload.
pub const RESERVED_DETAIL_KEYS: [&str; 2] = ["hash", "prev_hash"];

/// The closed enumeration of auditable actions.
///
/// Validated at the boundary: strings outside this set are rejected with
/// [`LedgerError::InvalidAction`] before any state mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    View,
    Create,
    Update,
    Delete,
    LoginSuccess,
    LoginFailure,
    Logout,
    Export,
}

impl AuditAction {
    /// All variants, in declaration order. Used for report breakdowns.
    pub const ALL: [AuditAction; 8] = [
        AuditAction::View,
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::LoginSuccess,
        AuditAction::LoginFailure,
        AuditAction::Logout,
        AuditAction::Export,
    ];

    /// The canonical wire string for this action.
    ///
    /// This string participates in the chain hash and the persisted layout,
    /// so it must never change for an existing variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::View => "view",
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::LoginSuccess => "login_success",
            AuditAction::LoginFailure => "login_failure",
            AuditAction::Logout => "logout",
            AuditAction::Export => "export",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(AuditAction::View),
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "login_success" => Ok(AuditAction::LoginSuccess),
            "login_failure" => Ok(AuditAction::LoginFailure),
            "logout" => Ok(AuditAction::Logout),
            "export" => Ok(AuditAction::Export),
            other => Err(LedgerError::InvalidAction(other.to_string())),
        }
    }
}

/// A caller-supplied audit event, the input to `append`.
///
/// `patient_id` is set whenever the entity is patient-scoped and drives
/// the patient-centric queries. `details` is an opaque structured payload
/// recorded verbatim (minus the reserved keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Who performed the action.
    pub actor_id: String,
    /// The actor's role at the time of the action (e.g., "physician").
    pub actor_role: String,
    /// What was done.
    pub action: AuditAction,
    /// The kind of entity acted on (e.g., "patient", "chart", "payment").
    pub entity_type: String,
    /// The specific entity acted on.
    pub entity_id: String,
    /// The patient this event concerns, when the entity is patient-scoped.
    pub patient_id: Option<String>,
    /// Opaque caller payload. Must not contain the reserved chain keys.
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    /// Create an event with no patient scope and no details.
    pub fn new(
        actor_id: impl Into<String>,
        actor_role: impl Into<String>,
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_role: actor_role.into(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            patient_id: None,
            details: None,
        }
    }

    /// Attach a patient scope to this event.
    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    /// Attach an opaque details payload to this event.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Validate the event before any state mutation.
    ///
    /// Rejects empty actor/entity identifiers and details payloads that
    /// carry the reserved chain keys at the top level.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.actor_id.is_empty() {
            return Err(LedgerError::InvalidEvent("actor_id is empty".into()));
        }
        if self.entity_id.is_empty() {
            return Err(LedgerError::InvalidEvent("entity_id is empty".into()));
        }
        if let Some(serde_json::Value::Object(map)) = &self.details {
            for key in RESERVED_DETAIL_KEYS {
                if map.contains_key(key) {
                    return Err(LedgerError::InvalidEvent(format!(
                        "details must not contain reserved key '{key}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use tempfile::NamedTempFile;

use custos_ledger::AuditStore;
use custos_types::{AuditAction, AuditEvent};

/// Create a temporary file for use as a test database.
pub fn temp_db() -> NamedTempFile {
    NamedTempFile::new().expect("should create temp file for ledger database")
}

/// Open an AuditStore on the given temp file.
pub fn open_test_store(tmp: &NamedTempFile) -> AuditStore {
    AuditStore::open(tmp.path()).expect("should open audit store")
}

/// A chart view scoped to a patient.
pub fn view_event(actor: &str, patient: &str) -> AuditEvent {
    AuditEvent::new(
        actor,
        "physician",
        AuditAction::View,
        "chart",
        format!("chart-{patient}"),
    )
    .with_patient(patient)
}

/// A successful login for an actor.
pub fn login_success_event(actor: &str) -> AuditEvent {
    AuditEvent::new(actor, "staff", AuditAction::LoginSuccess, "account", actor)
}

/// A failed login for an actor.
pub fn login_failure_event(actor: &str) -> AuditEvent {
    AuditEvent::new(actor, "staff", AuditAction::LoginFailure, "account", actor)
}

/// A logout for an actor.
pub fn logout_event(actor: &str) -> AuditEvent {
    AuditEvent::new(actor, "staff", AuditAction::Logout, "account", actor)
}

/// A record export, scoped to a patient.
pub fn export_event(actor: &str, patient: &str) -> AuditEvent {
    AuditEvent::new(
        actor,
        "admin",
        AuditAction::Export,
        "patient",
        patient,
    )
    .with_patient(patient)
}

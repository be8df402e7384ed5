//! Core types shared across the custos crates.
//!
//! Defines the closed audit action enumeration, the caller-supplied
//! event struct, anomaly-detection configuration, and error types used
//! by the ledger and any service layered on top of it.

pub mod config;
pub mod error;
pub mod event;

pub use config::AnomalyConfig;
pub use error::LedgerError;
pub use event::{AuditAction, AuditEvent, RESERVED_DETAIL_KEYS};

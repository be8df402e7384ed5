//! Tamper-evident audit ledger.
//!
//! Every access to a protected record is appended as a hash-chained
//! [`AuditEntry`]; the chain makes any retroactive edit or deletion
//! detectable by recomputation. Read-side components provide indexed
//! queries, anomaly detection over a time window, and compliance reports
//! that always embed an integrity attestation.
//!
//! The write path is single-writer: either hold the [`AuditStore`]
//! exclusively, or spawn a [`LedgerWriter`] thread and clone its handle
//! across callers.

pub mod anomaly;
pub mod entry;
pub mod filter;
pub mod integrity;
pub mod query;
pub mod report;
pub mod store;
pub mod writer;

pub use anomaly::{
    AfterHoursAccess, FailedLoginCluster, SuspiciousActivity, VolumeSpike,
    DEFAULT_DETECTION_WINDOW_HOURS,
};
pub use entry::AuditEntry;
pub use filter::AuditFilter;
pub use integrity::IntegrityReport;
pub use report::AuditReport;
pub use store::AuditStore;
pub use writer::LedgerWriter;

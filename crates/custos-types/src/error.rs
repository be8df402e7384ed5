//! Error types shared across the custos crates.

/// Errors that can occur in the audit ledger.
///
/// Validation errors (`InvalidAction`, `InvalidEvent`, `InvalidRange`,
/// `InvalidQuery`) are rejected before any state mutation. `WriteFailure`
/// means the durable store did not confirm an append; the chain cursor is
/// left unchanged and the caller may retry the whole logical action.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown audit action: {0}")]
    InvalidAction(String),

    #[error("invalid audit event: {0}")]
    InvalidEvent(String),

    #[error("durable write failed: {0}")]
    WriteFailure(String),

    #[error("invalid report range: {0}")]
    InvalidRange(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

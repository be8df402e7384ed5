use serde::Serialize;

/// The result of verifying the ledger's hash chain.
///
/// A broken chain is a finding, not an error: it is reported here and
/// never auto-repaired. Past the broken sequence the ledger can no longer
/// attest its own history, so the finding must reach a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Number of entries inspected before the walk ended.
    pub checked_entries: usize,
    /// True only when the walk completed with no mismatch. An incomplete
    /// (cancelled) walk is never reported as valid.
    pub valid: bool,
    /// Sequence of the first entry whose hash or chain link is invalid.
    pub broken_at: Option<u64>,
    /// False when the walk was cancelled before reaching the end of the
    /// requested range.
    pub complete: bool,
    /// Human-readable summary of the verification result.
    pub message: String,
}

//! AuditStore: SQLite-backed append-only hash-chained audit ledger.
//!
//! The store is constructed explicitly with [`AuditStore::open`], which
//! recovers the chain cursor (last sequence and hash) from durable
//! storage. There is no implicit singleton. Append is the only mutating
//! operation; it requires `&mut self`, so a store instance has exactly
//! one writer. For serialized appends from many threads, see
//! [`crate::writer::LedgerWriter`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};
use tracing::info;

use custos_types::{AuditEvent, LedgerError};

use crate::entry::{canonical_details, compute_hash, AuditEntry, GENESIS_HASH};
use crate::integrity::IntegrityReport;

/// Bounded blocking time for the durable write. If the database stays
/// locked longer than this, the append fails with `WriteFailure` instead
/// of holding the write path indefinitely.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// An append-only, hash-chained audit ledger backed by SQLite.
pub struct AuditStore {
    conn: Connection,
    next_sequence: u64,
    latest_hash: String,
}

impl AuditStore {
    /// Open (or create) the audit ledger at the given path.
    ///
    /// Enables WAL mode, creates the `audit_ledger` table and its
    /// secondary indices if they do not exist, and recovers the chain
    /// cursor from the highest stored row (or genesis for an empty
    /// ledger).
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)
            .map_err(|e| LedgerError::Storage(format!("failed to open database: {e}")))?;
        Self::init(conn)
    }

    /// Open an additional read-only handle on an existing ledger.
    ///
    /// WAL mode permits any number of concurrent readers alongside the
    /// single writer; queries, verification, anomaly scans, and reports
    /// all run through handles like this one. Calling `append` on a
    /// read-only handle fails with `WriteFailure`.
    pub fn open_read_only(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| LedgerError::Storage(format!("failed to open database read-only: {e}")))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| LedgerError::Storage(format!("failed to set busy timeout: {e}")))?;
        let (next_sequence, latest_hash) = read_cursor(&conn)?;
        Ok(Self {
            conn,
            next_sequence,
            latest_hash,
        })
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| LedgerError::Storage(format!("failed to set WAL mode: {e}")))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| LedgerError::Storage(format!("failed to set busy timeout: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_ledger (
                sequence INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                actor_role TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                patient_id TEXT,
                details TEXT,
                prev_hash TEXT NOT NULL,
                hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_ledger(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_ledger(actor_id);
            CREATE INDEX IF NOT EXISTS idx_audit_patient ON audit_ledger(patient_id);
            CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_ledger(action);",
        )
        .map_err(|e| LedgerError::Storage(format!("failed to create schema: {e}")))?;

        let (next_sequence, latest_hash) = read_cursor(&conn)?;

        info!(
            next_sequence,
            latest_hash = %latest_hash,
            "audit ledger opened"
        );

        Ok(Self {
            conn,
            next_sequence,
            latest_hash,
        })
    }

    /// Append a new entry to the ledger.
    ///
    /// Validates the event, assigns the next sequence number and the
    /// current timestamp, computes the chain hash, and writes the entry
    /// durably. The in-memory cursor advances only after the store
    /// confirms the write; on failure the chain state is unchanged and
    /// the same sequence number will be reused by the next attempt.
    pub fn append(&mut self, event: &AuditEvent) -> Result<AuditEntry, LedgerError> {
        event.validate()?;

        let sequence = self.next_sequence;
        let timestamp = Utc::now();
        let entry = AuditEntry::new(sequence, timestamp, event, self.latest_hash.clone());

        self.conn
            .execute(
                "INSERT INTO audit_ledger (sequence, timestamp, actor_id, actor_role, action, entity_type, entity_id, patient_id, details, prev_hash, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.sequence as i64,
                    entry.timestamp.to_rfc3339(),
                    entry.actor_id,
                    entry.actor_role,
                    entry.action.as_str(),
                    entry.entity_type,
                    entry.entity_id,
                    entry.patient_id,
                    canonical_details(entry.details.as_ref()),
                    entry.prev_hash,
                    entry.hash,
                ],
            )
            .map_err(|e| LedgerError::WriteFailure(format!("failed to insert entry: {e}")))?;

        self.next_sequence = sequence + 1;
        self.latest_hash = entry.hash.clone();
        Ok(entry)
    }

    /// The sequence number of the most recent entry, or `None` if empty.
    pub fn last_sequence(&self) -> Option<u64> {
        self.next_sequence.checked_sub(1)
    }

    /// Verify the integrity of the entire hash chain.
    pub fn verify_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        self.verify_integrity_range(None, None)
    }

    /// Verify the hash chain over an inclusive sequence range.
    ///
    /// Walks entries in sequence order and checks, for each one:
    /// 1. The sequence is the expected successor (no gaps).
    /// 2. `prev_hash` equals the preceding entry's stored hash (genesis
    ///    for sequence 0).
    /// 3. The stored hash matches recomputation over the stored fields.
    ///
    /// Stops at the first mismatch. The walk is bounded by the highest
    /// sequence visible at call start, so it is safe to run concurrently
    /// with appends; entries appended during verification are simply
    /// outside the verified range.
    ///
    /// If `cancel` is set mid-walk, the report carries `complete: false`
    /// and `valid: false`; a partial walk is never a clean attestation.
    pub fn verify_integrity_range(
        &self,
        range: Option<(u64, u64)>,
        cancel: Option<&AtomicBool>,
    ) -> Result<IntegrityReport, LedgerError> {
        // Malformed ranges are rejected before any storage access, even
        // on an empty ledger.
        if let Some((from, to)) = range {
            if from > to {
                return Err(LedgerError::InvalidRange(format!(
                    "from {from} is greater than to {to}"
                )));
            }
        }

        let ceiling: Option<i64> = self
            .conn
            .query_row("SELECT MAX(sequence) FROM audit_ledger", [], |row| {
                row.get(0)
            })
            .map_err(|e| LedgerError::Storage(format!("failed to read chain head: {e}")))?;

        let Some(ceiling) = ceiling else {
            return Ok(IntegrityReport {
                checked_entries: 0,
                valid: true,
                broken_at: None,
                complete: true,
                message: "ledger is empty".to_string(),
            });
        };
        let ceiling = ceiling as u64;

        let (from, to) = match range {
            Some((from, to)) => (from, to.min(ceiling)),
            None => (0, ceiling),
        };
        if from > ceiling {
            return Ok(IntegrityReport {
                checked_entries: 0,
                valid: true,
                broken_at: None,
                complete: true,
                message: format!("no entries at or above sequence {from}"),
            });
        }

        // For a partial range, linkage is anchored on the stored hash of
        // the predecessor entry; a missing predecessor is a gap.
        let mut expected_prev = if from == 0 {
            GENESIS_HASH.to_string()
        } else {
            match self.stored_hash_at(from - 1)? {
                Some(hash) => hash,
                None => {
                    return Ok(IntegrityReport {
                        checked_entries: 0,
                        valid: false,
                        broken_at: Some(from),
                        complete: true,
                        message: format!("predecessor of sequence {from} is missing"),
                    });
                }
            }
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT sequence, timestamp, actor_id, actor_role, action, entity_type, entity_id, patient_id, details, prev_hash, hash
                 FROM audit_ledger WHERE sequence >= ?1 AND sequence <= ?2 ORDER BY sequence ASC",
            )
            .map_err(|e| LedgerError::Storage(format!("failed to prepare verification: {e}")))?;

        let rows = stmt
            .query_map(params![from as i64, to as i64], |row| {
                Ok(RawRow {
                    sequence: row.get::<_, i64>(0)? as u64,
                    timestamp: row.get(1)?,
                    actor_id: row.get(2)?,
                    actor_role: row.get(3)?,
                    action: row.get(4)?,
                    entity_type: row.get(5)?,
                    entity_id: row.get(6)?,
                    patient_id: row.get(7)?,
                    details: row.get(8)?,
                    prev_hash: row.get(9)?,
                    hash: row.get(10)?,
                })
            })
            .map_err(|e| LedgerError::Storage(format!("failed to query entries: {e}")))?;

        let mut expected_seq = from;
        let mut checked = 0usize;

        for row in rows {
            let row = row.map_err(|e| LedgerError::Storage(format!("failed to read entry: {e}")))?;

            if let Some(cancel) = cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(IntegrityReport {
                        checked_entries: checked,
                        valid: false,
                        broken_at: None,
                        complete: false,
                        message: format!(
                            "verification cancelled after {checked} entries, before sequence {}",
                            row.sequence
                        ),
                    });
                }
            }

            if row.sequence != expected_seq {
                return Ok(IntegrityReport {
                    checked_entries: checked,
                    valid: false,
                    broken_at: Some(expected_seq),
                    complete: true,
                    message: format!(
                        "sequence gap: expected {expected_seq}, found {}",
                        row.sequence
                    ),
                });
            }

            if row.prev_hash != expected_prev {
                return Ok(IntegrityReport {
                    checked_entries: checked,
                    valid: false,
                    broken_at: Some(row.sequence),
                    complete: true,
                    message: format!(
                        "chain broken at sequence {}: expected prev_hash '{expected_prev}', found '{}'",
                        row.sequence, row.prev_hash
                    ),
                });
            }

            // Recompute over the stored byte forms, so any altered column
            // (including a garbled action string) surfaces as a mismatch.
            let recomputed = compute_hash(
                row.sequence,
                &row.timestamp,
                &row.actor_id,
                &row.actor_role,
                &row.action,
                &row.entity_type,
                &row.entity_id,
                row.patient_id.as_deref(),
                row.details.as_deref(),
                &row.prev_hash,
            );
            if row.hash != recomputed {
                return Ok(IntegrityReport {
                    checked_entries: checked,
                    valid: false,
                    broken_at: Some(row.sequence),
                    complete: true,
                    message: format!(
                        "hash mismatch at sequence {}: stored '{}', computed '{recomputed}'",
                        row.sequence, row.hash
                    ),
                });
            }

            expected_prev = row.hash;
            expected_seq += 1;
            checked += 1;
        }

        Ok(IntegrityReport {
            checked_entries: checked,
            valid: true,
            broken_at: None,
            complete: true,
            message: format!("all {checked} entries verified"),
        })
    }

    fn stored_hash_at(&self, sequence: u64) -> Result<Option<String>, LedgerError> {
        use rusqlite::OptionalExtension;
        self.conn
            .query_row(
                "SELECT hash FROM audit_ledger WHERE sequence = ?1",
                params![sequence as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LedgerError::Storage(format!("failed to read hash at {sequence}: {e}")))
    }

    /// Read access to the underlying connection (for query extensions).
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// The raw stored form of an entry, used by verification so hashing is
/// byte-faithful to the columns regardless of whether they still parse.
struct RawRow {
    sequence: u64,
    timestamp: String,
    actor_id: String,
    actor_role: String,
    action: String,
    entity_type: String,
    entity_id: String,
    patient_id: Option<String>,
    details: Option<String>,
    prev_hash: String,
    hash: String,
}

fn read_cursor(conn: &Connection) -> Result<(u64, String), LedgerError> {
    use rusqlite::OptionalExtension;
    let head: Option<(i64, String)> = conn
        .query_row(
            "SELECT sequence, hash FROM audit_ledger ORDER BY sequence DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| LedgerError::Storage(format!("failed to read chain cursor: {e}")))?;

    Ok(match head {
        Some((seq, hash)) => (seq as u64 + 1, hash),
        None => (0, GENESIS_HASH.to_string()),
    })
}

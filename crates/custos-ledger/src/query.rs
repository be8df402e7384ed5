//! Indexed query interface for audit records.
//!
//! All lookups here are backed by the secondary indices SQLite maintains
//! incrementally on every successful append; no query scans the whole
//! ledger to rebuild an index. Queries with no matching entries return an
//! empty list, never an error.

use chrono::{DateTime, Utc};
use rusqlite::params;

use custos_types::LedgerError;

use crate::entry::AuditEntry;
use crate::filter::AuditFilter;
use crate::store::AuditStore;

const ENTRY_COLUMNS: &str =
    "sequence, timestamp, actor_id, actor_role, action, entity_type, entity_id, patient_id, details, prev_hash, hash";

impl AuditStore {
    /// Return up to `limit` entries for the given patient, most recent
    /// first. Older entries beyond `limit` are simply truncated.
    pub fn patient_audit_log(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, LedgerError> {
        let mut stmt = self
            .connection()
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_ledger
                 WHERE patient_id = ?1 ORDER BY sequence DESC LIMIT ?2"
            ))
            .map_err(|e| LedgerError::Storage(format!("patient log prepare failed: {e}")))?;

        let rows = stmt
            .query_map(params![patient_id, limit as i64], row_to_entry)
            .map_err(|e| LedgerError::Storage(format!("patient log query failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Storage(format!("patient log read failed: {e}")))
    }

    /// Return up to `limit` entries for the given actor, most recent first.
    pub fn actor_audit_log(
        &self,
        actor_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, LedgerError> {
        let mut stmt = self
            .connection()
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_ledger
                 WHERE actor_id = ?1 ORDER BY sequence DESC LIMIT ?2"
            ))
            .map_err(|e| LedgerError::Storage(format!("actor log prepare failed: {e}")))?;

        let rows = stmt
            .query_map(params![actor_id, limit as i64], row_to_entry)
            .map_err(|e| LedgerError::Storage(format!("actor log query failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Storage(format!("actor log read failed: {e}")))
    }

    /// Search the audit log with a composable filter, in sequence order.
    pub fn search(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, LedgerError> {
        filter.validate()?;
        let fragment = filter.to_sql();

        let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM audit_ledger");
        if !fragment.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment.where_clause);
        }
        sql.push_str(" ORDER BY sequence ASC");
        if let Some(limit) = fragment.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = fragment.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        let mut stmt = self
            .connection()
            .prepare(&sql)
            .map_err(|e| LedgerError::Storage(format!("search prepare failed: {e}")))?;

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            fragment.params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(&param_refs[..], row_to_entry)
            .map_err(|e| LedgerError::Storage(format!("search failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Storage(format!("search read failed: {e}")))
    }

    /// Return all entries with `start <= timestamp < end`, in sequence order.
    pub(crate) fn entries_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, LedgerError> {
        let mut stmt = self
            .connection()
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_ledger
                 WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY sequence ASC"
            ))
            .map_err(|e| LedgerError::Storage(format!("range query prepare failed: {e}")))?;

        let rows = stmt
            .query_map(params![start.to_rfc3339(), end.to_rfc3339()], row_to_entry)
            .map_err(|e| LedgerError::Storage(format!("range query failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Storage(format!("range query read failed: {e}")))
    }

    /// Return the total number of entries in the ledger.
    pub fn count(&self) -> Result<usize, LedgerError> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM audit_ledger", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|c| c as usize)
            .map_err(|e| LedgerError::Storage(format!("count failed: {e}")))
    }
}

/// Map a SQLite row to an AuditEntry.
///
/// Stored text that no longer parses (a timestamp, action, or details
/// column altered behind the ledger's back) is reported as a conversion
/// failure, which the query surfaces as a `Storage` error. Integrity
/// verification walks the raw columns separately and will name the
/// tampered sequence.
pub(crate) fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let timestamp = row.get::<_, String>(1).and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(Into::into)
            .map_err(|e| conversion_failure(1, e))
    })?;
    let action = row
        .get::<_, String>(4)
        .and_then(|s| s.parse().map_err(|e| conversion_failure(4, e)))?;
    let details = row
        .get::<_, Option<String>>(8)?
        .map(|s| serde_json::from_str(&s).map_err(|e| conversion_failure(8, e)))
        .transpose()?;

    Ok(AuditEntry {
        sequence: row.get::<_, i64>(0)? as u64,
        timestamp,
        actor_id: row.get(2)?,
        actor_role: row.get(3)?,
        action,
        entity_type: row.get(5)?,
        entity_id: row.get(6)?,
        patient_id: row.get(7)?,
        details,
        prev_hash: row.get(9)?,
        hash: row.get(10)?,
    })
}

fn conversion_failure(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

//! Composable filter for audit log searches.
//!
//! Builds a parameterized SQL WHERE clause dynamically from optional
//! filter criteria. All filters are AND-combined. Each `Some` field adds
//! a condition; `None` fields are ignored. Unknown criteria are
//! unrepresentable: the filter is a closed struct, not a dynamic map.

use chrono::{DateTime, Utc};

use custos_types::{AuditAction, LedgerError};

/// A composable filter for querying the audit log.
///
/// Use `Default::default()` for an empty filter (matches everything),
/// then set individual fields to narrow results.
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    /// Only entries with this action.
    pub action: Option<AuditAction>,
    /// Only entries for this actor.
    pub actor_id: Option<String>,
    /// Only entries scoped to this patient.
    pub patient_id: Option<String>,
    /// Only entries at or after this timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Only entries at or before this timestamp.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Number of entries to skip (for pagination).
    pub offset: Option<usize>,
}

/// A built SQL fragment with its positional parameters.
pub(crate) struct SqlFragment {
    /// The WHERE clause (without the "WHERE" keyword), or empty if no filters.
    pub where_clause: String,
    /// The positional parameter values, in order.
    pub params: Vec<Box<dyn rusqlite::types::ToSql>>,
    /// The LIMIT clause value, if any.
    pub limit: Option<usize>,
    /// The OFFSET clause value, if any.
    pub offset: Option<usize>,
}

impl AuditFilter {
    /// Reject malformed filters before touching storage.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(LedgerError::InvalidQuery(format!(
                    "date range is inverted: {from} > {to}"
                )));
            }
        }
        Ok(())
    }

    /// Build a SQL WHERE clause and parameter list from this filter.
    ///
    /// Parameters use positional `?N` placeholders starting from 1.
    pub(crate) fn to_sql(&self) -> SqlFragment {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut idx = 1usize;

        if let Some(action) = self.action {
            conditions.push(format!("action = ?{idx}"));
            params.push(Box::new(action.as_str().to_string()));
            idx += 1;
        }

        if let Some(ref actor_id) = self.actor_id {
            conditions.push(format!("actor_id = ?{idx}"));
            params.push(Box::new(actor_id.clone()));
            idx += 1;
        }

        if let Some(ref patient_id) = self.patient_id {
            conditions.push(format!("patient_id = ?{idx}"));
            params.push(Box::new(patient_id.clone()));
            idx += 1;
        }

        if let Some(ref from) = self.from {
            conditions.push(format!("timestamp >= ?{idx}"));
            params.push(Box::new(from.to_rfc3339()));
            idx += 1;
        }

        if let Some(ref to) = self.to {
            conditions.push(format!("timestamp <= ?{idx}"));
            params.push(Box::new(to.to_rfc3339()));
            idx += 1;
        }

        // idx tracks the next parameter slot and must be kept in sync if
        // new filter branches are added above.
        let _ = idx;

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            conditions.join(" AND ")
        };

        SqlFragment {
            where_clause,
            params,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_produces_no_where_clause() {
        let filter = AuditFilter::default();
        let sql = filter.to_sql();
        assert!(sql.where_clause.is_empty());
        assert!(sql.params.is_empty());
    }

    #[test]
    fn single_action_filter() {
        let filter = AuditFilter {
            action: Some(AuditAction::Export),
            ..Default::default()
        };
        let sql = filter.to_sql();
        assert_eq!(sql.where_clause, "action = ?1");
        assert_eq!(sql.params.len(), 1);
    }

    #[test]
    fn combined_filters() {
        let filter = AuditFilter {
            action: Some(AuditAction::View),
            actor_id: Some("u1".into()),
            patient_id: Some("p1".into()),
            ..Default::default()
        };
        let sql = filter.to_sql();
        assert!(sql.where_clause.contains("action = "));
        assert!(sql.where_clause.contains("actor_id = "));
        assert!(sql.where_clause.contains("patient_id = "));
        assert_eq!(sql.params.len(), 3);
    }

    #[test]
    fn time_range_filter() {
        let now = Utc::now();
        let filter = AuditFilter {
            from: Some(now - chrono::Duration::hours(1)),
            to: Some(now),
            ..Default::default()
        };
        let sql = filter.to_sql();
        assert!(sql.where_clause.contains("timestamp >= ?1"));
        assert!(sql.where_clause.contains("timestamp <= ?2"));
        assert_eq!(sql.params.len(), 2);
    }

    #[test]
    fn inverted_range_fails_validation() {
        let now = Utc::now();
        let filter = AuditFilter {
            from: Some(now),
            to: Some(now - chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(matches!(
            filter.validate(),
            Err(LedgerError::InvalidQuery(_))
        ));
    }

    #[test]
    fn pagination_fields() {
        let filter = AuditFilter {
            limit: Some(20),
            offset: Some(40),
            ..Default::default()
        };
        let sql = filter.to_sql();
        assert_eq!(sql.limit, Some(20));
        assert_eq!(sql.offset, Some(40));
    }
}

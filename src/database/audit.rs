use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::audit::{AuditEntry, AuditError, AuditFilter, AuditStore};

pub const AUDIT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS console_audit_log (
    id UUID PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL,
    action TEXT NOT NULL,
    category TEXT NOT NULL,
    severity TEXT NOT NULL,
    username TEXT,
    entry JSONB NOT NULL
)"#;

pub const AUDIT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS console_audit_log_timestamp_idx ON console_audit_log (timestamp DESC)";

/// Audit entries as JSONB documents, with the filterable fields lifted into
/// their own columns
#[derive(Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn select_query<'a>(filter: &'a AuditFilter, limit: usize) -> QueryBuilder<'a, Postgres> {
        let mut qb = QueryBuilder::new("SELECT entry FROM console_audit_log WHERE TRUE");
        if let Some(action) = filter.action.as_deref().filter(|a| !a.is_empty()) {
            qb.push(" AND action ILIKE ").push_bind(format!("%{}%", escape_like(action)));
        }
        if let Some(username) = filter.username.as_deref().filter(|u| !u.is_empty()) {
            qb.push(" AND username = ").push_bind(username);
        }
        if let Some(category) = filter.category {
            qb.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(severity) = filter.severity {
            qb.push(" AND severity = ").push_bind(severity.as_str());
        }
        if let Some(from) = filter.from {
            qb.push(" AND timestamp >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND timestamp <= ").push_bind(to);
        }
        qb.push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        qb
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let document = serde_json::to_value(entry)?;
        sqlx::query(
            "INSERT INTO console_audit_log (id, timestamp, action, category, severity, username, entry) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.timestamp)
        .bind(&entry.action)
        .bind(entry.category.as_str())
        .bind(entry.severity.as_str())
        .bind(entry.actor.as_ref().map(|a| a.username.clone()))
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let mut qb = Self::select_query(filter, limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let document: Value = row.try_get("entry")?;
            entries.push(serde_json::from_value(document)?);
        }
        Ok(entries)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let result = sqlx::query("DELETE FROM console_audit_log WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> Result<u64, AuditError> {
        let result = sqlx::query("DELETE FROM console_audit_log").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{Category, Severity};

    #[test]
    fn unfiltered_query_only_orders_and_limits() {
        let filter = AuditFilter::default();
        let qb = PgAuditStore::select_query(&filter, 50);
        assert_eq!(
            qb.sql(),
            "SELECT entry FROM console_audit_log WHERE TRUE ORDER BY timestamp DESC LIMIT $1"
        );
    }

    #[test]
    fn every_criterion_is_bound() {
        let filter = AuditFilter {
            action: Some("query".into()),
            username: Some("ann".into()),
            category: Some(Category::Data),
            severity: Some(Severity::Error),
            from: Some(Utc::now()),
            to: None,
        };
        let qb = PgAuditStore::select_query(&filter, 10);
        assert_eq!(
            qb.sql(),
            "SELECT entry FROM console_audit_log WHERE TRUE AND action ILIKE $1 AND username = $2 \
             AND category = $3 AND severity = $4 AND timestamp >= $5 ORDER BY timestamp DESC LIMIT $6"
        );
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("100%_done"), "100\\%\\_done");
    }
}

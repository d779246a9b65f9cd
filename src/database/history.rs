use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::audit::{AuditError, ExecutionStatus, HistoryEntry, HistoryStore, QueryKind};

pub const HISTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS console_query_history (
    id BIGSERIAL PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL,
    username TEXT NOT NULL,
    query_type TEXT NOT NULL,
    namespace TEXT NOT NULL,
    description TEXT NOT NULL,
    result_count BIGINT NOT NULL,
    status TEXT NOT NULL
)"#;

pub const HISTORY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS console_query_history_user_idx ON console_query_history (username, timestamp DESC)";

#[derive(Clone)]
pub struct PgHistoryStore {
    pool: PgPool,
    per_actor: usize,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool, per_actor: usize) -> Self {
        Self { pool, per_actor }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), AuditError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO console_query_history \
             (timestamp, username, query_type, namespace, description, result_count, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.timestamp)
        .bind(&entry.username)
        .bind(entry.query_type.as_str())
        .bind(&entry.namespace)
        .bind(&entry.description)
        .bind(i64::try_from(entry.result_count).unwrap_or(i64::MAX))
        .bind(entry.status.as_str())
        .execute(&mut *tx)
        .await?;

        // Keep only the newest `per_actor` rows for this user
        sqlx::query(
            "DELETE FROM console_query_history WHERE username = $1 AND id NOT IN \
             (SELECT id FROM console_query_history WHERE username = $1 ORDER BY timestamp DESC, id DESC LIMIT $2)",
        )
        .bind(&entry.username)
        .bind(i64::try_from(self.per_actor).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn recent(&self, username: &str, limit: usize) -> Result<Vec<HistoryEntry>, AuditError> {
        let rows = sqlx::query(
            "SELECT timestamp, username, query_type, namespace, description, result_count, status \
             FROM console_query_history WHERE username = $1 ORDER BY timestamp DESC, id DESC LIMIT $2",
        )
        .bind(username)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let query_type: String = row.try_get("query_type")?;
            let status: String = row.try_get("status")?;
            let result_count: i64 = row.try_get("result_count")?;
            entries.push(HistoryEntry {
                timestamp: row.try_get("timestamp")?,
                username: row.try_get("username")?,
                query_type: QueryKind::parse(&query_type),
                namespace: row.try_get("namespace")?,
                description: row.try_get("description")?,
                result_count: u64::try_from(result_count).unwrap_or(0),
                status: if status == "success" { ExecutionStatus::Success } else { ExecutionStatus::Error },
            });
        }
        Ok(entries)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let result = sqlx::query("DELETE FROM console_query_history WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

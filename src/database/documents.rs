use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::sql_filter::{bind_param, SqlFilter, SqlParam};
use crate::query::{field, SortDirection, UpdateExpr};
use crate::store::{DocumentStore, FindRequest, StoreError, WriteRequest};

pub const DOCUMENTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id BIGSERIAL PRIMARY KEY,
    database_name TEXT NOT NULL,
    collection_name TEXT NOT NULL,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

pub const DOCUMENTS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS documents_namespace_idx ON documents (database_name, collection_name)";

/// Postgres SQLSTATE for a statement cancelled by `statement_timeout`
const QUERY_CANCELED: &str = "57014";

/// Documents stored as JSONB rows keyed by database and collection name
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    slow_query: Option<Duration>,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, slow_query: None }
    }

    /// Finds slower than `threshold` are logged at warn
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query = Some(threshold).filter(|t| !t.is_zero());
        self
    }

    pub(crate) fn find_sql(request: &FindRequest) -> Result<(String, Vec<SqlParam>), StoreError> {
        let mut params = vec![
            SqlParam::Text(request.namespace.database.clone()),
            SqlParam::Text(request.namespace.collection.clone()),
        ];
        let mut sql_filter = SqlFilter::new(params.len());
        let where_clause = sql_filter.where_clause(&request.filter).map_err(StoreError::Rejected)?;
        params.extend(sql_filter.into_params());

        let mut sql = format!(
            "SELECT data FROM documents WHERE database_name = $1 AND collection_name = $2 AND {}",
            where_clause
        );

        match &request.sort {
            Some(sort) => {
                params.push(SqlParam::TextArray(field::segments(&sort.field)));
                let direction = match sort.direction {
                    SortDirection::Asc => "ASC NULLS FIRST",
                    SortDirection::Desc => "DESC NULLS LAST",
                };
                sql.push_str(&format!(" ORDER BY data #> ${}::text[] {}, id ASC", params.len(), direction));
            }
            None => sql.push_str(" ORDER BY id ASC"),
        }

        params.push(SqlParam::Int(i64::from(request.limit)));
        sql.push_str(&format!(" LIMIT ${}", params.len()));
        Ok((sql, params))
    }

    pub(crate) fn update_sql(request: &WriteRequest, update: &UpdateExpr) -> Result<(String, Vec<SqlParam>), StoreError> {
        let mut params = vec![
            SqlParam::Text(request.namespace.database.clone()),
            SqlParam::Text(request.namespace.collection.clone()),
        ];
        let mut sql_filter = SqlFilter::new(params.len());
        let expression = sql_filter.update_expression(update).map_err(StoreError::Rejected)?;
        let where_clause = sql_filter.where_clause(&request.filter).map_err(StoreError::Rejected)?;
        params.extend(sql_filter.into_params());

        let sql = format!(
            "UPDATE documents SET data = {} WHERE database_name = $1 AND collection_name = $2 AND {}",
            expression, where_clause
        );
        Ok((sql, params))
    }

    pub(crate) fn delete_sql(request: &WriteRequest) -> Result<(String, Vec<SqlParam>), StoreError> {
        let mut params = vec![
            SqlParam::Text(request.namespace.database.clone()),
            SqlParam::Text(request.namespace.collection.clone()),
        ];
        let (where_clause, filter_params) =
            SqlFilter::generate(&request.filter, params.len()).map_err(StoreError::Rejected)?;
        params.extend(filter_params);

        let sql = format!(
            "DELETE FROM documents WHERE database_name = $1 AND collection_name = $2 AND {}",
            where_clause
        );
        Ok((sql, params))
    }

    async fn begin(&self, timeout: Duration) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx(e, timeout))?;
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(timeout.as_millis().to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx(e, timeout))?;
        Ok(tx)
    }

    async fn execute_write(&self, sql: &str, params: &[SqlParam], timeout: Duration) -> Result<u64, StoreError> {
        let mut tx = self.begin(timeout).await?;
        let mut q = sqlx::query(sql);
        for p in params {
            q = bind_param(q, p);
        }
        let result = q.execute(&mut *tx).await.map_err(|e| map_sqlx(e, timeout))?;
        tx.commit().await.map_err(|e| map_sqlx(e, timeout))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find(&self, request: &FindRequest) -> Result<Vec<Value>, StoreError> {
        let (sql, params) = Self::find_sql(request)?;
        tracing::debug!(namespace = %request.namespace, sql = %sql, "document find");

        let started = std::time::Instant::now();
        let mut tx = self.begin(request.timeout).await?;
        let mut q = sqlx::query(&sql);
        for p in &params {
            q = bind_param(q, p);
        }
        let rows = q
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx(e, request.timeout))?;
        tx.commit().await.map_err(|e| map_sqlx(e, request.timeout))?;

        let elapsed = started.elapsed();
        if self.slow_query.is_some_and(|threshold| elapsed > threshold) {
            tracing::warn!(
                namespace = %request.namespace,
                elapsed_ms = elapsed.as_millis() as u64,
                rows = rows.len(),
                "slow document query"
            );
        }

        rows.iter()
            .map(|row| {
                let data: Value = row.try_get("data")?;
                Ok(match &request.projection {
                    Some(projection) => projection.apply(&data),
                    None => data,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn update_many(&self, request: &WriteRequest, update: &UpdateExpr) -> Result<u64, StoreError> {
        let (sql, params) = Self::update_sql(request, update)?;
        self.execute_write(&sql, &params, request.timeout).await
    }

    async fn delete_many(&self, request: &WriteRequest) -> Result<u64, StoreError> {
        let (sql, params) = Self::delete_sql(request)?;
        self.execute_write(&sql, &params, request.timeout).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| map_sqlx(e, Duration::ZERO))
    }
}

fn map_sqlx(err: sqlx::Error, timeout: Duration) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED) => StoreError::Timeout(timeout),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Backend(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterExpr, Namespace, QuerySanitizer, SortSpec};

    fn request(filter: FilterExpr) -> FindRequest {
        FindRequest {
            namespace: Namespace::new("shop", "users").unwrap(),
            filter,
            sort: None,
            limit: 25,
            projection: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn find_sql_scopes_namespace_and_limits() {
        let (sql, params) = PgDocumentStore::find_sql(&request(FilterExpr::match_all())).unwrap();
        assert_eq!(
            sql,
            "SELECT data FROM documents WHERE database_name = $1 AND collection_name = $2 AND TRUE \
             ORDER BY id ASC LIMIT $3"
        );
        assert_eq!(params[0], SqlParam::Text("shop".into()));
        assert_eq!(params[2], SqlParam::Int(25));
    }

    #[test]
    fn find_sql_sorts_by_bound_path() {
        let mut req = request(QuerySanitizer::new(5).sanitize(r#"{"age": {"$gt": 1}}"#).unwrap());
        req.sort = Some(SortSpec::new("profile.age", SortDirection::Desc).unwrap());
        let (sql, params) = PgDocumentStore::find_sql(&req).unwrap();
        assert!(sql.ends_with("ORDER BY data #> $5::text[] DESC NULLS LAST, id ASC LIMIT $6"));
        assert_eq!(params[4], SqlParam::TextArray(vec!["profile".into(), "age".into()]));
        assert_eq!(params.len(), 6);
    }

    #[test]
    fn write_sql_numbers_update_before_filter() {
        let sanitizer = QuerySanitizer::new(5);
        let write = WriteRequest {
            namespace: Namespace::new("shop", "users").unwrap(),
            filter: sanitizer.sanitize(r#"{"status": {"$exists": true}}"#).unwrap(),
            timeout: Duration::from_secs(1),
        };
        let update = sanitizer.sanitize_update(r#"{"$set": {"status": "x"}}"#).unwrap();
        let (sql, params) = PgDocumentStore::update_sql(&write, &update).unwrap();
        assert_eq!(
            sql,
            "UPDATE documents SET data = jsonb_set(data, $3::text[], $4::jsonb, true) \
             WHERE database_name = $1 AND collection_name = $2 AND (data #> $5::text[]) IS NOT NULL"
        );
        assert_eq!(params.len(), 5);

        let (sql, _) = PgDocumentStore::delete_sql(&write).unwrap();
        assert!(sql.starts_with("DELETE FROM documents WHERE database_name = $1"));
    }
}

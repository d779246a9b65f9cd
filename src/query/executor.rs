use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::error::{QueryError, TIMEOUT_SUFFIX, UNAVAILABLE_MESSAGE};
use super::types::{FilterExpr, Namespace, QueryPlan, UpdateExpr};
use crate::config::QueryConfig;
use crate::store::{DocumentStore, FindRequest, StoreError, WriteRequest};

/// Documents returned by one plan, plus wall-clock time spent in the store
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub documents: Vec<Value>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct WriteOutput {
    pub affected: u64,
    pub elapsed: Duration,
}

/// Runs plans against the document store under clamped limits and timeouts
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn DocumentStore>,
    limits: QueryConfig,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, limits: QueryConfig) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &QueryConfig {
        &self.limits
    }

    /// Caller-supplied limit and timeout are clamped, never rejected. A
    /// failure never carries partial results.
    pub async fn execute(&self, plan: QueryPlan) -> Result<QueryOutput, QueryError> {
        let limit = self.limits.clamp_limit(plan.limit);
        let timeout = self.limits.clamp_timeout(plan.timeout);
        let request = FindRequest {
            namespace: plan.namespace,
            filter: plan.filter,
            sort: plan.sort,
            limit,
            projection: plan.projection,
            timeout,
        };

        if self.limits.debug_logging {
            tracing::debug!(
                namespace = %request.namespace,
                filter = %request.filter,
                limit,
                timeout_ms = timeout.as_millis() as u64,
                "executing query plan"
            );
        }

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.store.find(&request)).await;
        let elapsed = started.elapsed();

        let mut documents = match result {
            Ok(Ok(documents)) => documents,
            Ok(Err(err)) => return Err(execution_error(&request.namespace, err)),
            Err(_) => return Err(execution_error(&request.namespace, StoreError::Timeout(timeout))),
        };
        // The store is trusted to honour the limit, but the cap is hard
        documents.truncate(limit as usize);

        tracing::info!(
            namespace = %request.namespace,
            result_count = documents.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "query executed"
        );
        Ok(QueryOutput { documents, elapsed })
    }

    pub async fn update_many(
        &self,
        namespace: Namespace,
        filter: FilterExpr,
        update: &UpdateExpr,
    ) -> Result<WriteOutput, QueryError> {
        let request = self.write_request(namespace, filter);
        let started = Instant::now();
        let result = tokio::time::timeout(request.timeout, self.store.update_many(&request, update)).await;
        self.finish_write(&request, result, started, "update")
    }

    pub async fn delete_many(&self, namespace: Namespace, filter: FilterExpr) -> Result<WriteOutput, QueryError> {
        let request = self.write_request(namespace, filter);
        let started = Instant::now();
        let result = tokio::time::timeout(request.timeout, self.store.delete_many(&request)).await;
        self.finish_write(&request, result, started, "delete")
    }

    fn write_request(&self, namespace: Namespace, filter: FilterExpr) -> WriteRequest {
        WriteRequest {
            namespace,
            filter,
            timeout: self.limits.clamp_timeout(None),
        }
    }

    fn finish_write(
        &self,
        request: &WriteRequest,
        result: Result<Result<u64, StoreError>, tokio::time::error::Elapsed>,
        started: Instant,
        operation: &'static str,
    ) -> Result<WriteOutput, QueryError> {
        let elapsed = started.elapsed();
        let affected = match result {
            Ok(Ok(affected)) => affected,
            Ok(Err(err)) => return Err(execution_error(&request.namespace, err)),
            Err(_) => return Err(execution_error(&request.namespace, StoreError::Timeout(request.timeout))),
        };
        tracing::info!(
            namespace = %request.namespace,
            operation,
            affected,
            elapsed_ms = elapsed.as_millis() as u64,
            "bulk write executed"
        );
        Ok(WriteOutput { affected, elapsed })
    }
}

/// Full detail goes to the log; the caller gets a fixed description
fn execution_error(namespace: &Namespace, err: StoreError) -> QueryError {
    tracing::error!(namespace = %namespace, error = %err, "store operation failed");
    let message = match err {
        StoreError::Timeout(limit) => format!("operation exceeded the {} {}", limit.as_millis(), TIMEOUT_SUFFIX),
        StoreError::Unavailable(_) => UNAVAILABLE_MESSAGE.to_string(),
        StoreError::Rejected(_) => "the document store rejected the query".to_string(),
        StoreError::Backend(_) => "the document store returned an error".to_string(),
    };
    QueryError::Execution(message)
}

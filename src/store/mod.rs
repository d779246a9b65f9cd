//! Document store boundary. The executor only talks to `DocumentStore`;
//! `MemoryStore` evaluates filters in process, `PgDocumentStore`
//! (in `database::documents`) compiles them to SQL over JSONB rows.

pub mod matcher;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::query::{FilterExpr, Namespace, Projection, SortSpec, UpdateExpr};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("rejected by store: {0}")]
    Rejected(String),

    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

/// A read, with limit and timeout already clamped by the executor
#[derive(Debug, Clone)]
pub struct FindRequest {
    pub namespace: Namespace,
    pub filter: FilterExpr,
    pub sort: Option<SortSpec>,
    pub limit: u32,
    pub projection: Option<Projection>,
    pub timeout: Duration,
}

/// Filter-scoped write target
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub namespace: Namespace,
    pub filter: FilterExpr,
    pub timeout: Duration,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Filter, sort, limit and projection applied as one request
    async fn find(&self, request: &FindRequest) -> Result<Vec<Value>, StoreError>;

    async fn update_many(&self, request: &WriteRequest, update: &UpdateExpr) -> Result<u64, StoreError>;

    async fn delete_many(&self, request: &WriteRequest) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

use std::sync::Arc;

use crate::audit::{AuditStore, AuditTrail, HistoryStore, MemoryAuditStore, MemoryHistoryStore};
use crate::config::AppConfig;
use crate::pipeline::QueryPipeline;
use crate::query::QueryExecutor;
use crate::security::{SecurityGate, SessionRegistry};
use crate::store::{DocumentStore, MemoryStore};

/// Everything a handler needs, shared across requests
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<QueryPipeline>,
    pub sessions: SessionRegistry,
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        audit_store: Arc<dyn AuditStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let gate = SecurityGate::new(config.security.clone());
        let executor = QueryExecutor::new(store.clone(), config.query.clone());
        let audit = Arc::new(AuditTrail::new(audit_store, config.audit.fallback_capacity));
        let pipeline = QueryPipeline::new(gate, executor, audit, history);

        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            sessions: SessionRegistry::new(),
            store,
        }
    }

    /// Process-local stores only; nothing survives a restart
    pub fn in_memory(config: AppConfig, store: Arc<MemoryStore>) -> Self {
        let history = Arc::new(MemoryHistoryStore::new(config.audit.history_per_actor));
        Self::new(config, store, Arc::new(MemoryAuditStore::new()), history)
    }
}

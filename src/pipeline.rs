//! One request's path through the console core: security gate, filter
//! construction, execution, then exactly one data audit entry and a history
//! record whatever the outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::audit::{
    AuditEntry, AuditTrail, Category, ExecutionStatus, HistoryEntry, HistoryStore, QueryKind, Severity,
};
use crate::query::{
    FilterExpr, FilterTranslator, Namespace, ProjectionBuilder, QueryError, QueryExecutor, QueryPlan,
    QuerySanitizer, QuickOp, SortDirection, SortSpec, TypeTag, UpdateExpr, ValueCoercer,
};
use crate::security::{GateError, RequestMeta, SecurityGate, SessionContext};

const DESCRIPTION_MAX: usize = 500;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Bulk {0} requires explicit confirmation")]
    ConfirmationRequired(&'static str),
}

/// Query form as submitted by the console; every field is optional text
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryForm {
    pub query_field: String,
    pub query_value: String,
    pub query_op: String,
    pub value_type: String,
    pub sort: String,
    pub sort_order: String,
    pub limit: String,
    pub projection: String,
    pub custom_query: String,
    pub csrf_token: Option<String>,
}

/// Bulk update/delete request body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WriteForm {
    /// Filter document, either as JSON or as a JSON-encoded string
    pub filter: Value,
    pub update: Option<Value>,
    pub confirm: bool,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Update,
    Delete,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Update => "update",
            WriteKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query_type: QueryKind,
    pub filter: Value,
    pub count: usize,
    pub elapsed_ms: u64,
    pub documents: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub operation: &'static str,
    pub affected: u64,
    pub elapsed_ms: u64,
}

pub struct QueryPipeline {
    gate: SecurityGate,
    sanitizer: QuerySanitizer,
    executor: QueryExecutor,
    audit: Arc<AuditTrail>,
    history: Arc<dyn HistoryStore>,
}

impl QueryPipeline {
    pub fn new(
        gate: SecurityGate,
        executor: QueryExecutor,
        audit: Arc<AuditTrail>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let sanitizer = QuerySanitizer::new(executor.limits().max_nested_depth);
        Self {
            gate,
            sanitizer,
            executor,
            audit,
            history,
        }
    }

    pub fn gate(&self) -> &SecurityGate {
        &self.gate
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Run the gate on its own, auditing a rejection. Used by endpoints that
    /// do not execute queries but still mutate state.
    pub async fn admit(
        &self,
        session: &mut SessionContext,
        meta: &RequestMeta,
        csrf_token: Option<&str>,
    ) -> Result<(), GateError> {
        match self.gate.check(session, meta, csrf_token, Utc::now()) {
            Ok(()) => Ok(()),
            Err(err) => {
                let severity = if err.is_critical() { Severity::Critical } else { Severity::Warning };
                let entry = AuditEntry::builder("security_gate_rejected", Category::Security)
                    .severity(severity)
                    .actor(&session.actor)
                    .request(meta)
                    .details(json!({ "reason": err.kind(), "message": err.to_string() }))
                    .build();
                self.audit.record(entry).await;
                Err(err)
            }
        }
    }

    pub async fn run_query(
        &self,
        session: &mut SessionContext,
        meta: &RequestMeta,
        database: &str,
        collection: &str,
        form: &QueryForm,
    ) -> Result<QueryOutcome, PipelineError> {
        self.admit(session, meta, form.csrf_token.as_deref()).await?;

        let (plan, kind) = match self.build_plan(database, collection, form) {
            Ok(built) => built,
            Err(err) => {
                let details = json!({
                    "query_type": form_kind(form).as_str(),
                    "status": "error",
                    "error": err.kind(),
                    "message": err.to_string(),
                    "result_count": 0,
                });
                let entry = self
                    .data_entry("query_rejected", session, meta, database, collection)
                    .severity(Severity::Error)
                    .details(details)
                    .build();
                self.audit.record(entry).await;
                self.remember(session, form_kind(form), database, collection, &describe_form(form), 0, ExecutionStatus::Error)
                    .await;
                return Err(err.into());
            }
        };

        let namespace = plan.namespace.clone();
        let filter = plan.filter.to_value();
        let description = describe(kind, form, &plan.filter);
        let mut details = json!({
            "query_type": kind.as_str(),
            "filter": filter,
            "sort": plan.sort.as_ref().map(|s| json!({ "field": s.field, "direction": s.direction })),
            "limit": self.executor.limits().clamp_limit(plan.limit),
            "projection": plan.projection.as_ref().map(|p| p.fields().to_vec()),
        });

        match self.executor.execute(plan).await {
            Ok(output) => {
                let memory_bytes = serde_json::to_vec(&output.documents).map(|b| b.len() as u64).unwrap_or(0);
                details["status"] = json!("success");
                details["result_count"] = json!(output.documents.len());
                let entry = AuditEntry::builder("query_executed", Category::Data)
                    .actor(&session.actor)
                    .request(meta)
                    .namespace(&namespace)
                    .details(details)
                    .duration(output.elapsed)
                    .memory_bytes(memory_bytes)
                    .build();
                self.audit.record(entry).await;
                self.remember(
                    session,
                    kind,
                    database,
                    collection,
                    &description,
                    output.documents.len() as u64,
                    ExecutionStatus::Success,
                )
                .await;

                Ok(QueryOutcome {
                    query_type: kind,
                    filter,
                    count: output.documents.len(),
                    elapsed_ms: millis(output.elapsed),
                    documents: output.documents,
                })
            }
            Err(err) => {
                details["status"] = json!("error");
                details["error"] = json!(err.to_string());
                details["result_count"] = json!(0);
                let entry = AuditEntry::builder("query_executed", Category::Data)
                    .severity(Severity::Error)
                    .actor(&session.actor)
                    .request(meta)
                    .namespace(&namespace)
                    .details(details)
                    .build();
                self.audit.record(entry).await;
                self.remember(session, kind, database, collection, &description, 0, ExecutionStatus::Error)
                    .await;
                Err(err.into())
            }
        }
    }

    /// Bulk update or delete by filter. Nothing runs without `confirm`.
    pub async fn run_write(
        &self,
        session: &mut SessionContext,
        meta: &RequestMeta,
        database: &str,
        collection: &str,
        kind: WriteKind,
        form: &WriteForm,
    ) -> Result<WriteOutcome, PipelineError> {
        self.admit(session, meta, form.csrf_token.as_deref()).await?;
        let action = format!("bulk_{}", kind.as_str());

        let (namespace, filter, update) = match self.build_write(database, collection, kind, form) {
            Ok(built) => built,
            Err(err) => {
                let entry = self
                    .data_entry(&action, session, meta, database, collection)
                    .severity(Severity::Error)
                    .details(json!({ "status": "error", "error": err.kind(), "message": err.to_string() }))
                    .build();
                self.audit.record(entry).await;
                return Err(err.into());
            }
        };

        let mut details = json!({
            "filter": filter.to_value(),
            "update": update.as_ref().map(UpdateExpr::to_value),
        });

        if !form.confirm {
            details["status"] = json!("confirmation_required");
            let entry = AuditEntry::builder(action, Category::Data)
                .severity(Severity::Warning)
                .actor(&session.actor)
                .request(meta)
                .namespace(&namespace)
                .details(details)
                .build();
            self.audit.record(entry).await;
            return Err(PipelineError::ConfirmationRequired(kind.as_str()));
        }

        let result = match (&update, kind) {
            (Some(update), WriteKind::Update) => self.executor.update_many(namespace.clone(), filter, update).await,
            _ => self.executor.delete_many(namespace.clone(), filter).await,
        };

        match result {
            Ok(output) => {
                details["status"] = json!("success");
                details["affected"] = json!(output.affected);
                let entry = AuditEntry::builder(action, Category::Data)
                    .severity(Severity::Warning)
                    .actor(&session.actor)
                    .request(meta)
                    .namespace(&namespace)
                    .details(details)
                    .duration(output.elapsed)
                    .build();
                self.audit.record(entry).await;
                Ok(WriteOutcome {
                    operation: kind.as_str(),
                    affected: output.affected,
                    elapsed_ms: millis(output.elapsed),
                })
            }
            Err(err) => {
                details["status"] = json!("error");
                details["error"] = json!(err.to_string());
                let entry = AuditEntry::builder(action, Category::Data)
                    .severity(Severity::Error)
                    .actor(&session.actor)
                    .request(meta)
                    .namespace(&namespace)
                    .details(details)
                    .build();
                self.audit.record(entry).await;
                Err(err.into())
            }
        }
    }

    fn build_plan(
        &self,
        database: &str,
        collection: &str,
        form: &QueryForm,
    ) -> Result<(QueryPlan, QueryKind), QueryError> {
        let namespace = Namespace::new(database, collection)?;

        let (filter, kind) = if !form.custom_query.trim().is_empty() {
            (self.sanitizer.sanitize(&form.custom_query)?, QueryKind::Custom)
        } else if !form.query_field.trim().is_empty() {
            let tag: TypeTag = form.value_type.parse()?;
            let op: QuickOp = form.query_op.parse()?;
            let value = ValueCoercer::coerce(&form.query_value, tag)?;
            let filter = FilterTranslator::translate(&form.query_field, op, &value, &form.query_value)?;
            (filter, QueryKind::Quick)
        } else {
            (FilterExpr::match_all(), QueryKind::Browse)
        };

        let sort = if form.sort.trim().is_empty() {
            None
        } else {
            Some(SortSpec::new(&form.sort, SortDirection::parse_lenient(&form.sort_order))?)
        };

        // Unparsable limits fall back to the default rather than failing
        let limit = form.limit.trim().parse::<u32>().ok();

        let plan = QueryPlan::new(namespace, filter)
            .sort(sort)
            .limit(limit)
            .projection(ProjectionBuilder::build(&form.projection));
        Ok((plan, kind))
    }

    fn build_write(
        &self,
        database: &str,
        collection: &str,
        kind: WriteKind,
        form: &WriteForm,
    ) -> Result<(Namespace, FilterExpr, Option<UpdateExpr>), QueryError> {
        let namespace = Namespace::new(database, collection)?;
        // An omitted filter is not "everything"; callers must send {} for that
        if form.filter.is_null() {
            return Err(QueryError::invalid_query("filter is required"));
        }
        let filter = self.sanitizer.sanitize(&raw_json(&form.filter))?;
        let update = match kind {
            WriteKind::Delete => None,
            WriteKind::Update => {
                let raw = form
                    .update
                    .as_ref()
                    .map(raw_json)
                    .ok_or_else(|| QueryError::invalid_query("update document is required"))?;
                Some(self.sanitizer.sanitize_update(&raw)?)
            }
        };
        Ok((namespace, filter, update))
    }

    fn data_entry(
        &self,
        action: &str,
        session: &SessionContext,
        meta: &RequestMeta,
        database: &str,
        collection: &str,
    ) -> crate::audit::AuditEntryBuilder {
        let builder = AuditEntry::builder(action, Category::Data)
            .actor(&session.actor)
            .request(meta);
        match Namespace::new(database, collection) {
            Ok(namespace) => builder.namespace(&namespace),
            Err(_) => builder,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn remember(
        &self,
        session: &SessionContext,
        kind: QueryKind,
        database: &str,
        collection: &str,
        description: &str,
        result_count: u64,
        status: ExecutionStatus,
    ) {
        let entry = HistoryEntry {
            timestamp: Utc::now(),
            username: session.actor.username.clone(),
            query_type: kind,
            namespace: format!("{}.{}", database, collection),
            description: truncate(description),
            result_count,
            status,
        };
        if let Err(err) = self.history.append(&entry).await {
            tracing::warn!(error = %err, "failed to record query history");
        }
    }
}

fn form_kind(form: &QueryForm) -> QueryKind {
    if !form.custom_query.trim().is_empty() {
        QueryKind::Custom
    } else if !form.query_field.trim().is_empty() {
        QueryKind::Quick
    } else {
        QueryKind::Browse
    }
}

fn describe(kind: QueryKind, form: &QueryForm, filter: &FilterExpr) -> String {
    match kind {
        QueryKind::Quick => describe_form(form),
        QueryKind::Custom => filter.to_string(),
        QueryKind::Browse => "all documents".to_string(),
    }
}

fn describe_form(form: &QueryForm) -> String {
    match form_kind(form) {
        QueryKind::Quick => {
            let op = if form.query_op.trim().is_empty() { "equals" } else { form.query_op.trim() };
            format!("{} {} {}", form.query_field.trim(), op, form.query_value)
        }
        QueryKind::Custom => form.custom_query.trim().to_string(),
        QueryKind::Browse => "all documents".to_string(),
    }
}

fn truncate(s: &str) -> String {
    match s.char_indices().nth(DESCRIPTION_MAX) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

fn raw_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn millis(elapsed: Duration) -> u64 {
    elapsed.as_millis().min(u64::MAX as u128) as u64
}

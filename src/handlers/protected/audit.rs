use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::utils;
use crate::audit::{age_cutoff, AuditEntry, AuditFilter, Category, Severity};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthSession};
use crate::security::{Capability, RequestMeta};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PruneRequest {
    /// Falls back to the configured retention
    pub days: Option<u32>,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClearRequest {
    pub csrf_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub days: u32,
    pub removed_audit: u64,
    pub removed_history: u64,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: u64,
}

/// GET /api/audit - filtered audit entries, newest first
pub async fn audit_list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Extension(meta): Extension<RequestMeta>,
    filter: Result<Query<AuditFilter>, QueryRejection>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<AuditEntry>> {
    admit(&state, &auth, &meta, Capability::ViewAudit, None).await?;
    let filter = audit_filter(filter)?;

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let entries = state.pipeline.audit().query(&filter, limit).await?;
    Ok(ApiResponse::success(entries))
}

/// GET /api/audit/export - matching entries as a downloadable JSON array
pub async fn audit_export(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Extension(meta): Extension<RequestMeta>,
    filter: Result<Query<AuditFilter>, QueryRejection>,
) -> Result<Response, ApiError> {
    admit(&state, &auth, &meta, Capability::ViewAudit, None).await?;
    let filter = audit_filter(filter)?;

    let body = state.pipeline.audit().export(&filter).await?;
    let entry = AuditEntry::builder("audit_log_exported", Category::Security)
        .actor(&auth.actor)
        .request(&meta)
        .details(json!({ "bytes": body.len() }))
        .build();
    state.pipeline.audit().record(entry).await;

    let filename = format!("attachment; filename=\"audit-{}.json\"", Utc::now().format("%Y%m%d%H%M%S"));
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        body,
    )
        .into_response())
}

/// POST /api/audit/prune - drop audit and history entries past retention
pub async fn audit_prune(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Extension(meta): Extension<RequestMeta>,
    headers: HeaderMap,
    body: Option<Json<PruneRequest>>,
) -> ApiResult<PruneResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let csrf = utils::csrf_token(request.csrf_token, &headers);
    admit(&state, &auth, &meta, Capability::ManageAudit, csrf.as_deref()).await?;

    let days = request.days.unwrap_or(state.config.audit.retention_days);
    let audit = state.pipeline.audit();
    let removed_audit = audit.prune(days).await?;

    let history_cutoff = age_cutoff(Utc::now(), state.config.audit.history_expiry_days);
    let removed_history = match history_cutoff {
        Some(cutoff) => state.pipeline.history().purge_before(cutoff).await?,
        None => 0,
    };

    let entry = AuditEntry::builder("audit_log_pruned", Category::Security)
        .severity(severity_for(removed_audit))
        .actor(&auth.actor)
        .request(&meta)
        .details(json!({ "days": days, "removed": removed_audit, "removed_history": removed_history }))
        .build();
    audit.record(entry).await;

    Ok(ApiResponse::success(PruneResponse {
        days,
        removed_audit,
        removed_history,
    }))
}

/// POST /api/audit/clear - wipe the audit log
pub async fn audit_clear(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Extension(meta): Extension<RequestMeta>,
    headers: HeaderMap,
    body: Option<Json<ClearRequest>>,
) -> ApiResult<ClearResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let csrf = utils::csrf_token(request.csrf_token, &headers);
    admit(&state, &auth, &meta, Capability::ManageAudit, csrf.as_deref()).await?;

    let removed = state.pipeline.audit().clear(Some(&auth.actor)).await?;
    tracing::warn!(username = %auth.actor.username, removed, "audit log cleared");
    Ok(ApiResponse::success(ClearResponse { removed }))
}

async fn admit(
    state: &AppState,
    auth: &AuthSession,
    meta: &RequestMeta,
    capability: Capability,
    csrf: Option<&str>,
) -> Result<(), ApiError> {
    utils::require(state, auth, meta, capability).await?;
    let mut session = auth.session.lock().await;
    state.pipeline.admit(&mut session, meta, csrf).await?;
    Ok(())
}

fn audit_filter(filter: Result<Query<AuditFilter>, QueryRejection>) -> Result<AuditFilter, ApiError> {
    filter.map(|Query(filter)| filter).map_err(|rejection| ApiError::InvalidQuery {
        code: "INVALID_FILTER",
        message: rejection.body_text(),
    })
}

/// Removing history is worth a second look; a no-op prune is routine
fn severity_for(removed: u64) -> Severity {
    if removed > 0 { Severity::Warning } else { Severity::Info }
}

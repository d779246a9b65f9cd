use axum::http::HeaderMap;
use serde_json::json;

use crate::audit::{AuditEntry, Category, Severity};
use crate::error::ApiError;
use crate::middleware::AuthSession;
use crate::security::{Capability, RequestMeta};
use crate::state::AppState;

pub const CSRF_HEADER: &str = "x-csrf-token";

/// Refuse the request unless the caller's role grants `capability`.
/// Refusals are audited.
pub async fn require(
    state: &AppState,
    auth: &AuthSession,
    meta: &RequestMeta,
    capability: Capability,
) -> Result<(), ApiError> {
    if auth.capabilities.allows(capability) {
        return Ok(());
    }

    tracing::warn!(username = %auth.actor.username, role = %auth.actor.role, ?capability, "capability denied");
    let entry = AuditEntry::builder("capability_denied", Category::Security)
        .severity(Severity::Warning)
        .actor(&auth.actor)
        .request(meta)
        .details(json!({ "capability": capability, "role": auth.actor.role }))
        .build();
    state.pipeline.audit().record(entry).await;

    Err(ApiError::forbidden(format!(
        "Role '{}' may not perform this action",
        auth.actor.role
    )))
}

/// CSRF token from the body field, else the X-CSRF-Token header
pub fn csrf_token(field: Option<String>, headers: &HeaderMap) -> Option<String> {
    field.filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

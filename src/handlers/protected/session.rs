use axum::{extract::State, Extension};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::middleware::{ApiResponse, ApiResult, AuthSession};
use crate::security::{RequestMeta, SessionState};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
    pub session_id: String,
    pub state: SessionState,
}

/// GET /api/session/csrf - the session's CSRF token, rotated when expired
pub async fn csrf_get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<CsrfResponse> {
    let mut session = auth.session.lock().await;
    state.pipeline.admit(&mut session, &meta, None).await?;

    let ttl = state.config.security.csrf_token_ttl();
    let token = session.csrf_token(Utc::now(), ttl).clone();
    Ok(ApiResponse::success(CsrfResponse {
        csrf_token: token.value().to_string(),
        expires_at: token.expires_at(),
        session_id: session.session_id().to_string(),
        state: session.state(),
    }))
}

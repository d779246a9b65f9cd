use axum::{
    extract::{Query, State},
    Extension,
};
use serde::Deserialize;

use super::utils;
use crate::audit::HistoryEntry;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthSession};
use crate::security::{Capability, RequestMeta};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

/// GET /api/history - the caller's own recent queries, newest first
pub async fn history_get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Extension(meta): Extension<RequestMeta>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<HistoryEntry>> {
    utils::require(&state, &auth, &meta, Capability::ReadData).await?;
    {
        let mut session = auth.session.lock().await;
        state.pipeline.admit(&mut session, &meta, None).await?;
    }

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let entries = state
        .pipeline
        .history()
        .recent(&auth.actor.username, limit)
        .await
        .map_err(ApiError::from)?;
    Ok(ApiResponse::success(entries))
}

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Form,
};

use super::utils;
use crate::middleware::{ApiResponse, ApiResult, AuthSession};
use crate::pipeline::{QueryForm, QueryOutcome};
use crate::security::{Capability, RequestMeta};
use crate::state::AppState;

/// POST /api/query/:database/:collection - quick, custom or browse query
pub async fn query_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Extension(meta): Extension<RequestMeta>,
    Path((database, collection)): Path<(String, String)>,
    headers: HeaderMap,
    Form(mut form): Form<QueryForm>,
) -> ApiResult<QueryOutcome> {
    utils::require(&state, &auth, &meta, Capability::ReadData).await?;
    form.csrf_token = utils::csrf_token(form.csrf_token.take(), &headers);

    let mut session = auth.session.lock().await;
    let outcome = state
        .pipeline
        .run_query(&mut session, &meta, &database, &collection, &form)
        .await?;
    Ok(ApiResponse::success(outcome))
}

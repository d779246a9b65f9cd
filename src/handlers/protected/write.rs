use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};

use super::utils;
use crate::middleware::{ApiResponse, ApiResult, AuthSession};
use crate::pipeline::{WriteForm, WriteKind, WriteOutcome};
use crate::security::{Capability, RequestMeta};
use crate::state::AppState;

/// POST /api/update/:database/:collection - bulk update by filter
pub async fn update_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Extension(meta): Extension<RequestMeta>,
    Path((database, collection)): Path<(String, String)>,
    headers: HeaderMap,
    Json(form): Json<WriteForm>,
) -> ApiResult<WriteOutcome> {
    run(state, auth, meta, database, collection, headers, WriteKind::Update, form).await
}

/// POST /api/delete/:database/:collection - bulk delete by filter
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Extension(meta): Extension<RequestMeta>,
    Path((database, collection)): Path<(String, String)>,
    headers: HeaderMap,
    Json(form): Json<WriteForm>,
) -> ApiResult<WriteOutcome> {
    run(state, auth, meta, database, collection, headers, WriteKind::Delete, form).await
}

#[allow(clippy::too_many_arguments)]
async fn run(
    state: AppState,
    auth: AuthSession,
    meta: RequestMeta,
    database: String,
    collection: String,
    headers: HeaderMap,
    kind: WriteKind,
    mut form: WriteForm,
) -> ApiResult<WriteOutcome> {
    utils::require(&state, &auth, &meta, Capability::WriteData).await?;
    form.csrf_token = utils::csrf_token(form.csrf_token.take(), &headers);

    let mut session = auth.session.lock().await;
    let outcome = state
        .pipeline
        .run_write(&mut session, &meta, &database, &collection, kind, &form)
        .await?;
    Ok(ApiResponse::success(outcome))
}

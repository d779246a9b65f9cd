pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod query;
pub mod security;
pub mod state;
pub mod store;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Full console router: public routes plus the JWT-protected API
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.api.max_request_size_bytes;
    let request_logging = state.config.api.enable_request_logging;

    let router = Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(handlers::public::health_get))
        // Protected API
        .merge(protected_routes(state.clone()))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit));

    let router = if request_logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };
    router.with_state(state)
}

fn protected_routes(state: AppState) -> Router<AppState> {
    use handlers::protected as api;

    Router::new()
        .route("/api/session/csrf", get(api::csrf_get))
        .route("/api/query/:database/:collection", post(api::query_post))
        .route("/api/update/:database/:collection", post(api::update_post))
        .route("/api/delete/:database/:collection", post(api::delete_post))
        .route("/api/history", get(api::history_get))
        .route("/api/audit", get(api::audit_list))
        .route("/api/audit/export", get(api::audit_export))
        .route("/api/audit/prune", post(api::audit_prune))
        .route("/api/audit/clear", post(api::audit_clear))
        .route_layer(from_fn_with_state(state, middleware::jwt_auth_middleware))
}

async fn not_found(uri: axum::http::Uri) -> error::ApiError {
    error::ApiError::not_found(format!("No route for {}", uri.path()))
}

async fn root() -> axum::Json<Value> {
    axum::Json(json!({
        "success": true,
        "data": {
            "name": "Document Store Console",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "health": "/health (public)",
                "session": "/api/session/csrf (protected)",
                "query": "/api/query/:database/:collection (protected, read)",
                "write": "/api/update|delete/:database/:collection (protected, write)",
                "history": "/api/history (protected, read)",
                "audit": "/api/audit[/export|/prune|/clear] (protected, audit)",
            }
        }
    }))
}

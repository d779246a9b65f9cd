use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::auth::validate_jwt;
use crate::error::ApiError;
use crate::security::{Actor, CapabilitySet, RequestMeta, SharedSession};
use crate::state::AppState;

/// Authenticated session context extracted from the JWT
#[derive(Clone)]
pub struct AuthSession {
    pub actor: Actor,
    pub capabilities: CapabilitySet,
    pub session: SharedSession,
}

/// JWT authentication middleware: resolves the bearer token to a console
/// session and attaches it, with the request's transport facts, to the
/// request extensions
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_jwt_from_headers(&headers) {
        Ok(token) => token,
        Err(msg) => return ApiError::unauthorized(msg).into_response(),
    };

    let claims = match validate_jwt(&token, &state.config.security.jwt_secret) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(error = %err, "rejected bearer token");
            return ApiError::unauthorized(err.to_string()).into_response();
        }
    };

    let actor = claims.actor();
    let session = state
        .sessions
        .get_or_create(
            actor.clone(),
            claims.accepted_until(),
            Utc::now(),
            state.config.security.csrf_token_ttl(),
        )
        .await;
    let meta = request_meta(&headers, &request);

    request.extensions_mut().insert(AuthSession {
        capabilities: CapabilitySet::for_role(&actor.role),
        actor,
        session,
    });
    request.extensions_mut().insert(meta);

    next.run(request).await
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.trim().to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Forwarded headers first (the console sits behind a proxy), then the socket
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

fn request_meta(headers: &HeaderMap, request: &Request) -> RequestMeta {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    RequestMeta {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        ip: client_ip(headers, peer),
        user_agent: header_str(headers, "user-agent"),
        referer: header_str(headers, "referer"),
    }
}

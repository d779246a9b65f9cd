// HTTP API Error Types
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::audit::AuditError;
use crate::pipeline::PipelineError;
use crate::query::QueryError;
use crate::security::GateError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    InvalidQuery { code: &'static str, message: String },
    ConfirmationRequired(String),

    // 401 Unauthorized
    Unauthorized(String),
    SessionInvalid(String),

    // 403 Forbidden
    Forbidden(String),
    Csrf(String),

    // 404 Not Found
    NotFound(String),

    // 429 Too Many Requests
    TooManyRequests { message: String, retry_after_secs: i64 },

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),

    // 504 Gateway Timeout
    Timeout(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidQuery { .. } | ApiError::ConfirmationRequired(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) | ApiError::SessionInvalid(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::Csrf(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::ConfirmationRequired(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::SessionInvalid(msg)
            | ApiError::Forbidden(msg)
            | ApiError::Csrf(msg)
            | ApiError::NotFound(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::Timeout(msg) => msg,
            ApiError::InvalidQuery { message, .. } | ApiError::TooManyRequests { message, .. } => message,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidQuery { code, .. } => *code,
            ApiError::ConfirmationRequired(_) => "CONFIRMATION_REQUIRED",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::SessionInvalid(_) => "SESSION_INVALID",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Csrf(_) => "CSRF_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::TooManyRequests { .. } => "TOO_MANY_REQUESTS",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Timeout(_) => "QUERY_TIMEOUT",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        });
        if let ApiError::TooManyRequests { retry_after_secs, .. } = self {
            body["retry_after_secs"] = json!(retry_after_secs);
        }
        body
    }
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Csrf => ApiError::Csrf(err.to_string()),
            GateError::SessionInvalid(_) => ApiError::SessionInvalid(err.to_string()),
            GateError::RateLimited { retry_after } => {
                let retry_after_secs = (retry_after - chrono::Utc::now()).num_seconds().max(1);
                ApiError::TooManyRequests {
                    message: err.to_string(),
                    retry_after_secs,
                }
            }
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match &err {
            QueryError::InvalidValue { .. } => ApiError::InvalidQuery {
                code: "INVALID_VALUE",
                message: err.to_string(),
            },
            QueryError::InvalidField(_) => ApiError::InvalidQuery {
                code: "INVALID_FIELD",
                message: err.to_string(),
            },
            QueryError::InvalidQuery(_) => ApiError::InvalidQuery {
                code: "INVALID_QUERY",
                message: err.to_string(),
            },
            // Execution messages are already sanitized by the executor
            QueryError::Execution(_) if err.is_timeout() => ApiError::Timeout(err.to_string()),
            QueryError::Execution(_) if err.is_unavailable() => ApiError::ServiceUnavailable(err.to_string()),
            QueryError::Execution(_) => ApiError::InternalServerError(err.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Gate(e) => e.into(),
            PipelineError::Query(e) => e.into(),
            PipelineError::ConfirmationRequired(_) => ApiError::ConfirmationRequired(err.to_string()),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        // Log the real error but return generic message
        tracing::error!("Audit store error: {}", err);
        match err {
            AuditError::Unavailable(_) => ApiError::service_unavailable("Audit log temporarily unavailable"),
            AuditError::Backend(_) | AuditError::Serialization(_) => {
                ApiError::internal_server_error("Audit log error occurred")
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.to_json())).into_response();
        if let ApiError::TooManyRequests { retry_after_secs, .. } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::InvalidReason;

    #[test]
    fn gate_errors_map_to_distinct_statuses() {
        assert_eq!(ApiError::from(GateError::Csrf).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::from(GateError::SessionInvalid(InvalidReason::IdleExpired)).status_code(),
            StatusCode::UNAUTHORIZED
        );
        let limited = ApiError::from(GateError::RateLimited {
            retry_after: chrono::Utc::now() + chrono::Duration::seconds(30),
        });
        assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(limited.to_json()["retry_after_secs"].as_i64().unwrap() >= 1);
    }

    #[test]
    fn execution_errors_keep_sanitized_message() {
        let err = ApiError::from(QueryError::Execution("operation exceeded the 100 ms time limit".into()));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error_code(), "QUERY_TIMEOUT");

        let err = ApiError::from(QueryError::Execution("document store is unavailable".into()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn body_shape() {
        let body = ApiError::from(QueryError::InvalidField("$where".into())).to_json();
        assert_eq!(body["error"], json!(true));
        assert_eq!(body["code"], json!("INVALID_FIELD"));
        assert_eq!(body["message"], json!("Invalid field name: $where"));
    }
}

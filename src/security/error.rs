use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a session can no longer be used; each forces re-authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Unauthenticated,
    BindingMismatch,
    IdleExpired,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::Unauthenticated => "unauthenticated",
            InvalidReason::BindingMismatch => "binding_mismatch",
            InvalidReason::IdleExpired => "idle_expired",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    #[error("CSRF token missing, invalid or expired")]
    Csrf,

    #[error("Session is no longer valid ({0})")]
    SessionInvalid(InvalidReason),

    #[error("Too many requests; retry after {retry_after}")]
    RateLimited { retry_after: DateTime<Utc> },
}

impl GateError {
    /// Forgery and hijacking signals are critical; the rest are warnings
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            GateError::Csrf | GateError::SessionInvalid(InvalidReason::BindingMismatch)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GateError::Csrf => "csrf_error",
            GateError::SessionInvalid(_) => "session_invalid",
            GateError::RateLimited { .. } => "rate_limited",
        }
    }
}

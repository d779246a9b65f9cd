use thiserror::Error;

pub(crate) const TIMEOUT_SUFFIX: &str = "ms time limit";
pub(crate) const UNAVAILABLE_MESSAGE: &str = "document store is unavailable";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Invalid {tag} value: {reason}")]
    InvalidValue { tag: &'static str, reason: String },

    #[error("Invalid field name: {0}")]
    InvalidField(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Store-side failure; the message is already sanitized for display
    #[error("Query execution failed: {0}")]
    Execution(String),
}

impl QueryError {
    pub fn invalid_value(tag: &'static str, reason: impl Into<String>) -> Self {
        QueryError::InvalidValue { tag, reason: reason.into() }
    }

    pub fn invalid_query(reason: impl Into<String>) -> Self {
        QueryError::InvalidQuery(reason.into())
    }

    /// Store time limit exceeded
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryError::Execution(msg) if msg.ends_with(TIMEOUT_SUFFIX))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueryError::Execution(msg) if msg == UNAVAILABLE_MESSAGE)
    }

    /// Short machine-readable code used in audit details
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::InvalidValue { .. } => "invalid_value",
            QueryError::InvalidField(_) => "invalid_field",
            QueryError::InvalidQuery(_) => "invalid_query",
            QueryError::Execution(_) => "execution_error",
        }
    }
}

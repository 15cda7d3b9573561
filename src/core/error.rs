use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Concurrent update: {0}")]
    ConcurrentUpdate(String),

    #[error("Timed out after {waited:?} waiting for in-flight execution of '{key}'")]
    LockTimeout { key: String, waited: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Application-level error codes shared with the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidInput,
    Unauthorized,
    Forbidden,
    Internal,
    Conflict,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::Internal => "INTERNAL_ERROR",
            Self::Conflict => "CONFLICT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::ConcurrentUpdate(_) | Self::Conflict(_) | Self::LockTimeout { .. } => {
                ErrorCode::Conflict
            }
            Self::Cancelled | Self::Serialization(_) | Self::Store(_) | Self::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Whether the caller may retry the same request and expect a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::ConcurrentUpdate(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_variants() {
        assert_eq!(CoreError::NotFound("x".into()).code(), ErrorCode::NotFound);
        assert_eq!(
            CoreError::ConcurrentUpdate("x".into()).code(),
            ErrorCode::Conflict
        );
        assert_eq!(CoreError::Cancelled.code().as_str(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_retryable_errors() {
        let timeout = CoreError::LockTimeout {
            key: "k".into(),
            waited: Duration::from_secs(30),
        };
        assert!(timeout.is_retryable());
        assert!(CoreError::ConcurrentUpdate("doc".into()).is_retryable());
        assert!(!CoreError::Forbidden("host only".into()).is_retryable());
    }
}

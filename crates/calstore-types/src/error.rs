use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("invalid property name {0:?}: expected {{namespace}}name")]
    InvalidPropertyName(String),

    #[error("unknown share type {0:?}")]
    UnknownShareType(String),

    #[error("unknown access mode {0:?}")]
    UnknownAccessMode(String),
}

/// Result alias for type operations.
pub type TypeResult<T> = Result<T, TypeError>;

use thiserror::Error;

/// Errors produced by the attachment store.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("invalid attachment name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("attachment not found: {dropbox_id}/{name}")]
    NotFound { dropbox_id: String, name: String },

    #[error("attachment I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for attachment operations.
pub type AttachResult<T> = Result<T, AttachError>;

//! Error types for datastore operations.

use calstore_attach::AttachError;
use calstore_types::TypeError;
use thiserror::Error;

/// Errors that can occur during datastore operations.
#[derive(Debug, Error)]
pub enum DataStoreError {
    /// The referenced home, calendar, object, property or record does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// An entity with this name already exists under the same parent.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    /// A component body, name or metadata field was rejected.
    #[error("invalid {name}: {reason}")]
    Validation { name: String, reason: String },

    /// A concurrent transaction holds the row; retry the whole transaction.
    #[error("conflict on {resource}: {reason}")]
    Conflict { resource: String, reason: String },

    /// Uniqueness violated on insert. Handled by provisioning, never returned
    /// from a public operation.
    #[error("uniqueness violated for {key}")]
    ConstraintRace { key: String },

    /// Backing storage is closed or failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The transaction was already committed or rolled back.
    #[error("transaction {0} is closed")]
    TransactionClosed(u64),

    #[error(transparent)]
    Attachment(#[from] AttachError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DataStoreError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Errors after which the transaction has been rolled back.
    pub fn aborts_transaction(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::StorageUnavailable(_))
    }

    /// Errors worth retrying with a fresh transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::StorageUnavailable(_) | Self::TransactionClosed(_)
        )
    }
}

impl From<std::io::Error> for DataStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

/// Convenience type alias for datastore operations.
pub type DataStoreResult<T> = std::result::Result<T, DataStoreError>;

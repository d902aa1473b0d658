use std::path::PathBuf;

use calstore_datastore::DataStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("legacy source error: {0}")]
    Source(String),

    #[error("legacy home not found: {0}")]
    HomeNotFound(String),

    #[error("malformed property sidecar {path}: {reason}")]
    Sidecar { path: PathBuf, reason: String },

    #[error("filter rejected component: {0}")]
    Filter(String),

    #[error(transparent)]
    Store(#[from] DataStoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Failures confined to one source object. The engine counts these and
    /// moves on; everything else ends the migration.
    pub fn is_object_local(&self) -> bool {
        match self {
            Self::Source(_) | Self::Sidecar { .. } | Self::Filter(_) | Self::Io(_) => true,
            Self::Store(err) => matches!(
                err,
                DataStoreError::Validation { .. }
                    | DataStoreError::AlreadyExists { .. }
                    | DataStoreError::NotFound { .. }
                    | DataStoreError::Type(_)
            ),
            Self::HomeNotFound(_) => false,
        }
    }
}

pub type MigrateResult<T> = Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_validation_is_local() {
        let err = MigrateError::from(DataStoreError::Validation {
            name: "component".into(),
            reason: "no UID".into(),
        });
        assert!(err.is_object_local());
    }

    #[test]
    fn aborting_store_errors_are_fatal() {
        let conflict = MigrateError::from(DataStoreError::Conflict {
            resource: "calendar".into(),
            reason: "lock timeout".into(),
        });
        assert!(!conflict.is_object_local());
        let closed = MigrateError::from(DataStoreError::TransactionClosed(7));
        assert!(!closed.is_object_local());
        let gone = MigrateError::from(DataStoreError::StorageUnavailable("closed".into()));
        assert!(!gone.is_object_local());
    }

    #[test]
    fn io_errors_are_local() {
        let err = MigrateError::from(std::io::Error::new(std::io::ErrorKind::InvalidData, "not utf-8"));
        assert!(err.is_object_local());
        assert!(err.to_string().contains("not utf-8"));
    }
}

//! Error types for the persistence access layer.

use thiserror::Error;

/// Result type for persistence access operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing persisted entities.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error raised by a non-JSON serializer.
    #[error("codec error: {0}")]
    Codec(String),

    /// A stored record decoded but was rejected by the validation predicate.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Conversion between the entity payload and its serialized form failed.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The entity handed to `store` has no payload.
    #[error("entity {0} has no data to store")]
    MissingData(String),

    /// The key cannot be used to address a record.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A pending operation was cancelled by its caller.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A background task failed before producing a result.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl From<entipersist_types::Error> for StorageError {
    fn from(err: entipersist_types::Error) -> Self {
        match err {
            entipersist_types::Error::InvalidKey(msg) => Self::InvalidKey(msg),
            entipersist_types::Error::Serialization(e) => Self::Serialization(e),
        }
    }
}

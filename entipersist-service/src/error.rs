//! Error types for the lifecycle service.

use entipersist_dao::StorageError;
use thiserror::Error;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned to callers of the service.
///
/// Failures while persisting notifications are never returned here; they are
/// logged and reported as [`PersistenceEvent`](crate::PersistenceEvent)s.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `start` was called more than once.
    #[error("persistence service already started")]
    AlreadyStarted,

    /// The operation needs the store, which is created by `start`.
    #[error("persistence service not started")]
    NotStarted,

    /// Storage error from the persistence access layer.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO error (configuration file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task stopped accepting work.
    #[error("channel closed")]
    ChannelClosed,
}

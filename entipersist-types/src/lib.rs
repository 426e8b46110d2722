//! Core type definitions for entipersist.
//!
//! This crate defines the types shared by the persistence layer and by any
//! entity collection that feeds it:
//! - [`Entity`] and its [`EntityStatus`] (unresolved / resolved / failed)
//! - Resolve DTOs ([`ResolveSucceeded`], [`ResolvedMultiple`], [`ResolveResult`])
//! - [`PersistenceInfo`] descriptors
//! - [`EntityNotification`], the change events a collection emits
//!
//! Nothing here knows how entities are stored; that belongs to
//! `entipersist-dao`.

mod entity;
mod notification;
mod resolve;

pub use entity::{Entity, EntityStatus, ResolveStatus};
pub use notification::EntityNotification;
pub use resolve::{PersistenceInfo, ResolveResult, ResolveSucceeded, ResolvedMultiple};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid entity key: {0}")]
    InvalidKey(String),
}

/// Checks that `key` can identify an entity.
///
/// Keys must be non-empty and free of control characters. Any other
/// character is allowed; stores are responsible for encoding keys into
/// their own naming scheme.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key is empty".to_string()));
    }
    if key.chars().any(char::is_control) {
        return Err(Error::InvalidKey(format!(
            "key {key:?} contains control characters"
        )));
    }
    Ok(())
}

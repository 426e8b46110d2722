//! Change notifications emitted by an entity collection.

use serde::{Deserialize, Serialize};

/// A change to one entity of a collection.
///
/// Creation and update are both reported as `Updated`; consumers look the
/// entity up to see its current state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum EntityNotification {
    /// The entity with this key was created or changed.
    Updated(String),
    /// The entity with this key was removed.
    Removed(String),
}

impl EntityNotification {
    /// The key of the affected entity.
    pub fn key(&self) -> &str {
        match self {
            Self::Updated(key) | Self::Removed(key) => key,
        }
    }
}

//! Resolve DTOs exchanged between a store and an entity collection.

use serde::{Deserialize, Serialize};

/// One successfully resolved `(key, payload)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveSucceeded<D> {
    pub key: String,
    pub data: D,
}

impl<D> ResolveSucceeded<D> {
    pub fn new(key: impl Into<String>, data: D) -> Self {
        Self {
            key: key.into(),
            data,
        }
    }
}

/// A batch of resolved entities, merged into a collection in one step so
/// observers see a consistent snapshot rather than a stream of inserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMultiple<D> {
    pub entities: Vec<ResolveSucceeded<D>>,
}

impl<D> ResolvedMultiple<D> {
    pub fn new(entities: Vec<ResolveSucceeded<D>>) -> Self {
        Self { entities }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Keys of the batch, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.key.as_str())
    }
}

impl<D> Default for ResolvedMultiple<D> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
        }
    }
}

impl<D> From<Vec<ResolveSucceeded<D>>> for ResolvedMultiple<D> {
    fn from(entities: Vec<ResolveSucceeded<D>>) -> Self {
        Self { entities }
    }
}

/// Outcome of resolving a single key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ResolveResult<D> {
    Found(D),
    NotFound,
}

impl<D> ResolveResult<D> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Converts into an `Option`, dropping the not-found marker.
    pub fn into_option(self) -> Option<D> {
        match self {
            Self::Found(data) => Some(data),
            Self::NotFound => None,
        }
    }
}

impl<D> From<Option<D>> for ResolveResult<D> {
    fn from(value: Option<D>) -> Self {
        match value {
            Some(data) => Self::Found(data),
            None => Self::NotFound,
        }
    }
}

/// Whether a key currently has a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistenceInfo {
    pub key: String,
    pub is_stored: bool,
}

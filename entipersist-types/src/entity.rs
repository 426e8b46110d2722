//! The entity container mirrored by the persistence layer.
//!
//! An entity is owned by its collection. The persistence layer only reads
//! entities (to store them) and hands back resolved payloads (after a load).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an entity is in its resolution lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveStatus {
    /// No payload has been resolved yet.
    #[default]
    Unresolved,
    /// The payload was resolved successfully.
    Resolved,
    /// The most recent resolve attempt failed.
    Failed,
}

/// Resolution status of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStatus {
    /// Outcome of the most recent resolve.
    pub resolve_status: ResolveStatus,
    /// When the payload was last resolved, if ever.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Error message of the last failed resolve.
    #[serde(default)]
    pub error: Option<String>,
}

impl EntityStatus {
    /// Status of an entity whose payload was just resolved.
    #[must_use]
    pub fn resolved_now() -> Self {
        Self {
            resolve_status: ResolveStatus::Resolved,
            resolved_at: Some(Utc::now()),
            error: None,
        }
    }

    /// True once a payload has been resolved at least once.
    ///
    /// A later failed refresh does not clear this: the previously resolved
    /// payload is still valid data.
    pub fn has_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Records a failed resolve, keeping any earlier resolution time.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.resolve_status = ResolveStatus::Failed;
        self.error = Some(error.into());
    }
}

/// An identified, typed, resolvable unit of application state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<D> {
    pub id: String,
    pub status: EntityStatus,
    pub data: Option<D>,
}

impl<D> Entity<D> {
    /// Creates an entity that has not been resolved yet.
    pub fn unresolved(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: EntityStatus::default(),
            data: None,
        }
    }

    /// Creates an entity holding a freshly resolved payload.
    pub fn resolved(id: impl Into<String>, data: D) -> Self {
        Self {
            id: id.into(),
            status: EntityStatus::resolved_now(),
            data: Some(data),
        }
    }

    /// See [`EntityStatus::has_resolved`].
    pub fn has_resolved(&self) -> bool {
        self.status.has_resolved()
    }
}

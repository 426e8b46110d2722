//! Lifecycle state and the events a running service reports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the service is in its startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Not started yet.
    #[default]
    Uninitialized,
    /// Bulk load in progress.
    Loading,
    /// Loaded and mirroring collection changes to storage.
    Ready,
}

impl LifecycleState {
    /// Whether the store exists, i.e. `start` has got past location
    /// derivation.
    pub fn is_started(self) -> bool {
        !matches!(self, Self::Uninitialized)
    }
}

/// Kind of a notification-driven write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Store,
    Remove,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => f.write_str("store"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// Events published on the service's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PersistenceEvent {
    /// Initial bulk load finished and the batch was handed to the
    /// collection. Sent exactly once.
    LoadComplete {
        entity_type: String,
        loaded: usize,
        skipped: usize,
    },
    /// The collection rejected the loaded batch.
    PublishFailed { error: String },
    /// A record was written.
    Stored { key: String },
    /// A record was deleted.
    Removed { key: String },
    /// The listener fell behind the collection and missed `missed`
    /// notifications. The collection was rescanned and its current state
    /// queued for writing.
    NotificationsLagged { missed: u64 },
    /// A notification-driven write failed. Not retried.
    WriteFailed {
        key: String,
        kind: WriteKind,
        error: String,
    },
}

impl PersistenceEvent {
    /// The entity key this event concerns, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Stored { key } | Self::Removed { key } | Self::WriteFailed { key, .. } => {
                Some(key)
            }
            Self::LoadComplete { .. }
            | Self::PublishFailed { .. }
            | Self::NotificationsLagged { .. } => None,
        }
    }
}

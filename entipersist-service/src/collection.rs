//! The entity collection the service mirrors.
//!
//! [`HasEntities`] is everything the service needs from a collection: lookup,
//! change notifications and batch injection of loaded payloads.
//! [`EntityCollection`] is a ready-made in-memory implementation.

use entipersist_types::{validate_key, Entity, EntityNotification, EntityStatus, ResolvedMultiple};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

/// Errors raised by a collection.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("invalid entity key: {0}")]
    InvalidKey(String),

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("collection rejected batch: {0}")]
    Rejected(String),
}

/// A live collection of entities of payload type `D`.
pub trait HasEntities<D>: Send + Sync {
    /// Current state of the entity under `key`.
    fn get_entity(&self, key: &str) -> Option<Entity<D>>;

    /// Keys of every entity currently in the collection. Used to resync
    /// after notifications were missed.
    fn entity_keys(&self) -> Vec<String>;

    /// Subscribes to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<EntityNotification>;

    /// Merges a batch of resolved payloads in one step, marking each entity
    /// resolved.
    fn resolved_multiple(&self, batch: ResolvedMultiple<D>) -> Result<(), CollectionError>;
}

/// In-memory [`HasEntities`] implementation.
///
/// Every mutation sends one notification after the change is visible, so a
/// subscriber that looks the key up sees at least that state.
pub struct EntityCollection<D> {
    entities: RwLock<HashMap<String, Entity<D>>>,
    notifications: broadcast::Sender<EntityNotification>,
}

impl<D> EntityCollection<D>
where
    D: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }

    /// Creates a collection whose notification channel buffers `capacity`
    /// messages per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (notifications, _) = broadcast::channel(capacity.max(1));
        Self {
            entities: RwLock::new(HashMap::new()),
            notifications,
        }
    }

    /// Inserts or replaces a resolved entity and notifies `Updated`.
    pub fn put(&self, key: impl Into<String>, data: D) -> Result<(), CollectionError> {
        let key = key.into();
        validate_key(&key).map_err(|e| CollectionError::InvalidKey(e.to_string()))?;
        self.write()
            .insert(key.clone(), Entity::resolved(key.clone(), data));
        self.notify(EntityNotification::Updated(key));
        Ok(())
    }

    /// Inserts a placeholder that has not been resolved yet. Notifies
    /// `Updated`; the persistence layer ignores it until it resolves.
    pub fn insert_unresolved(&self, key: impl Into<String>) -> Result<(), CollectionError> {
        let key = key.into();
        validate_key(&key).map_err(|e| CollectionError::InvalidKey(e.to_string()))?;
        self.write()
            .insert(key.clone(), Entity::unresolved(key.clone()));
        self.notify(EntityNotification::Updated(key));
        Ok(())
    }

    /// Records a failed resolve for `key`. Any earlier payload is kept.
    pub fn mark_failed(&self, key: &str, error: impl Into<String>) -> Result<(), CollectionError> {
        {
            let mut entities = self.write();
            let entity = entities
                .get_mut(key)
                .ok_or_else(|| CollectionError::NotFound(key.to_string()))?;
            entity.status.mark_failed(error);
        }
        self.notify(EntityNotification::Updated(key.to_string()));
        Ok(())
    }

    /// Removes `key`. Returns the removed entity; notifies `Removed` only if
    /// something was there.
    pub fn remove(&self, key: &str) -> Option<Entity<D>> {
        let removed = self.write().remove(key);
        if removed.is_some() {
            self.notify(EntityNotification::Removed(key.to_string()));
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Keys currently in the collection, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn notify(&self, notification: EntityNotification) {
        // No receivers is fine
        if self.notifications.send(notification).is_err() {
            trace!("no notification subscribers");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entity<D>>> {
        self.entities.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entity<D>>> {
        self.entities.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<D> Default for EntityCollection<D>
where
    D: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<D> HasEntities<D> for EntityCollection<D>
where
    D: Clone + Send + Sync + 'static,
{
    fn get_entity(&self, key: &str) -> Option<Entity<D>> {
        self.read().get(key).cloned()
    }

    fn entity_keys(&self) -> Vec<String> {
        self.keys()
    }

    fn subscribe(&self) -> broadcast::Receiver<EntityNotification> {
        self.notifications.subscribe()
    }

    fn resolved_multiple(&self, batch: ResolvedMultiple<D>) -> Result<(), CollectionError> {
        for key in batch.keys() {
            validate_key(key).map_err(|e| CollectionError::Rejected(e.to_string()))?;
        }

        let keys: Vec<String> = batch.keys().map(str::to_string).collect();
        {
            let mut entities = self.write();
            for resolved in batch.entities {
                let entity = entities
                    .entry(resolved.key.clone())
                    .or_insert_with(|| Entity::unresolved(resolved.key.clone()));
                entity.data = Some(resolved.data);
                entity.status = EntityStatus::resolved_now();
            }
        }

        debug!(count = keys.len(), "merged resolved batch");
        for key in keys {
            self.notify(EntityNotification::Updated(key));
        }
        Ok(())
    }
}

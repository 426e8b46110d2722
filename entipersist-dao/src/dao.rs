//! Persistence access abstraction.
//!
//! Defines the storage-agnostic contract the lifecycle service drives, so the
//! same service works against a directory of files, an in-memory backend, or
//! any other store.

use crate::error::StorageResult;
use async_trait::async_trait;
use entipersist_types::{Entity, PersistenceInfo, ResolveResult, ResolveSucceeded, ResolvedMultiple};

/// A stored record that was skipped during a bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    /// Where the record lives (file path or backend key).
    pub location: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of a bulk load: every record that validated, plus the ones that
/// did not.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport<D> {
    /// Successfully decoded records, ordered by key.
    pub loaded: Vec<ResolveSucceeded<D>>,
    /// Corrupt or invalid records that were dropped.
    pub skipped: Vec<SkippedRecord>,
}

impl<D> Default for LoadReport<D> {
    fn default() -> Self {
        Self {
            loaded: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<D> LoadReport<D> {
    /// Consumes the report, keeping only the loaded entities as a batch.
    pub fn into_batch(self) -> ResolvedMultiple<D> {
        ResolvedMultiple::new(self.loaded)
    }
}

/// Storage contract for one persisted entity collection.
///
/// Implementations own the on-disk (or in-memory) representation: they
/// serialize payloads on `store` and validate records on `load_stored` and
/// `resolve`. Callers only deal in keys and payloads.
#[async_trait]
pub trait EntityPersistenceDao<D>: Send + Sync
where
    D: Send + Sync + 'static,
{
    /// Loads every stored record.
    ///
    /// Individually corrupt or invalid records are logged and reported in
    /// [`LoadReport::skipped`]; they never fail the whole load. An error is
    /// returned only when the store itself cannot be enumerated.
    async fn load_stored(&self) -> StorageResult<LoadReport<D>>;

    /// Looks up a single key. Read-only: never writes to the store.
    async fn resolve(&self, key: &str) -> StorageResult<ResolveResult<D>>;

    /// Persists the entity's payload under `key`, replacing any earlier record.
    ///
    /// Concurrent calls for different keys are allowed. Calls for the same
    /// key are applied one at a time, in the order they reach the store.
    async fn store(&self, entity: &Entity<D>, key: &str) -> StorageResult<()>;

    /// Deletes the record for `key`. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Reports whether `key` currently has a record.
    async fn persistence_info(&self, key: &str) -> StorageResult<PersistenceInfo> {
        let is_stored = self.resolve(key).await?.is_found();
        Ok(PersistenceInfo {
            key: key.to_string(),
            is_stored,
        })
    }
}

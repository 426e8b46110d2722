//! In-memory store.
//!
//! Records are kept as encoded bytes in a [`MemoryBackend`], so they go
//! through the same serializer and validation as on-disk records. Several
//! stores can share one backend, which is how a "restart" is simulated.

use crate::dao::{EntityPersistenceDao, LoadReport, SkippedRecord};
use crate::error::{StorageError, StorageResult};
use crate::serializer::{Converter, RecordCodec, SerializerFactory, Validation};
use async_trait::async_trait;
use entipersist_types::{
    validate_key, Entity, PersistenceInfo, ResolveResult, ResolveSucceeded,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Shared record storage for [`MemoryPersistence`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    records: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes raw bytes for `key`, bypassing serialization.
    pub async fn insert_raw(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.records.write().await.insert(key.into(), bytes.into());
    }

    /// Reads the raw bytes stored for `key`.
    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.records.read().await.get(key).cloned()
    }

    /// Stored keys in order.
    pub async fn keys(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Memory-backed [`EntityPersistenceDao`].
pub struct MemoryPersistence<D, S = D> {
    backend: MemoryBackend,
    codec: RecordCodec<D, S>,
}

impl<D> MemoryPersistence<D, D>
where
    D: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates a store with its own empty backend.
    pub fn new() -> Self {
        Self::with_backend(MemoryBackend::new())
    }

    /// Creates a store over an existing (possibly shared) backend.
    pub fn with_backend(backend: MemoryBackend) -> Self {
        Self {
            backend,
            codec: RecordCodec::json(),
        }
    }
}

impl<D> Default for MemoryPersistence<D, D>
where
    D: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<D, S> MemoryPersistence<D, S>
where
    D: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    /// Creates a store whose records are `S`, converted from payloads `D`.
    pub fn with_converter(
        backend: MemoryBackend,
        serializer_factory: Arc<dyn SerializerFactory<S>>,
        converter: Arc<dyn Converter<D, S>>,
    ) -> Self {
        Self {
            backend,
            codec: RecordCodec::new(serializer_factory, converter),
        }
    }

    /// Sets the record format and the validation predicate in one step.
    pub fn configure(
        self,
        serializer_factory: Arc<dyn SerializerFactory<S>>,
        validation: Validation<S>,
    ) -> Self {
        self.set_serializer_factory(serializer_factory)
            .set_validation(validation)
    }

    /// Sets the record format.
    pub fn set_serializer_factory(mut self, serializer_factory: Arc<dyn SerializerFactory<S>>) -> Self {
        self.codec.set_factory(serializer_factory);
        self
    }

    /// Sets the predicate records must pass to be loaded.
    pub fn set_validation(mut self, validation: Validation<S>) -> Self {
        self.codec.set_validation(validation);
        self
    }

    /// Sets the payload conversion.
    pub fn set_converter(mut self, converter: Arc<dyn Converter<D, S>>) -> Self {
        self.codec.set_converter(converter);
        self
    }

    /// The backend holding this store's records.
    pub fn backend(&self) -> &MemoryBackend {
        &self.backend
    }
}

#[async_trait]
impl<D, S> EntityPersistenceDao<D> for MemoryPersistence<D, S>
where
    D: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    async fn load_stored(&self) -> StorageResult<LoadReport<D>> {
        let records = self.backend.records.read().await;
        let mut report = LoadReport::default();

        for (key, bytes) in records.iter() {
            match self.codec.decode(bytes) {
                Ok(data) => report.loaded.push(ResolveSucceeded::new(key.clone(), data)),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping invalid record");
                    report.skipped.push(SkippedRecord {
                        location: key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "loaded in-memory entities"
        );
        Ok(report)
    }

    async fn resolve(&self, key: &str) -> StorageResult<ResolveResult<D>> {
        validate_key(key)?;
        match self.backend.records.read().await.get(key) {
            Some(bytes) => Ok(ResolveResult::Found(self.codec.decode(bytes)?)),
            None => Ok(ResolveResult::NotFound),
        }
    }

    async fn store(&self, entity: &Entity<D>, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let data = entity
            .data
            .as_ref()
            .ok_or_else(|| StorageError::MissingData(key.to_string()))?;
        let bytes = self.codec.encode(data)?;
        self.backend.records.write().await.insert(key.to_string(), bytes);
        debug!(key, "stored entity in memory");
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.backend.records.write().await.remove(key);
        Ok(())
    }

    async fn persistence_info(&self, key: &str) -> StorageResult<PersistenceInfo> {
        validate_key(key)?;
        Ok(PersistenceInfo {
            key: key.to_string(),
            is_stored: self.backend.records.read().await.contains_key(key),
        })
    }
}

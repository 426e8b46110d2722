//! Shared helpers for lifecycle service tests.

#![allow(dead_code)]

use async_trait::async_trait;
use entipersist_dao::{
    EntityPersistenceDao, LoadReport, MemoryBackend, MemoryPersistence, StorageError,
    StorageResult,
};
use entipersist_service::{
    DaoFactory, EntityCollection, PersistenceConfig, PersistenceEvent, PersistenceService,
};
use entipersist_types::{Entity, ResolveResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::broadcast;

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    #[serde(default)]
    pub pinned: bool,
}

pub fn note(title: &str) -> Note {
    Note {
        title: title.to_string(),
        pinned: false,
    }
}

/// A store call seen by [`CountingDao`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Load,
    Resolve(String),
    Store(String, String),
    Remove(String),
}

/// Memory store that records every call and can be told to fail or stall.
pub struct CountingDao {
    inner: MemoryPersistence<Note>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    fail_load: bool,
}

impl CountingDao {
    pub fn new(backend: MemoryBackend) -> Self {
        Self {
            inner: MemoryPersistence::with_backend(backend),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            fail_load: false,
        }
    }

    /// A store whose bulk load fails outright.
    pub fn failing_load(backend: MemoryBackend) -> Self {
        Self {
            fail_load: true,
            ..Self::new(backend)
        }
    }

    pub fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    /// Makes stores of `key` take `delay` before writing.
    pub fn delay_key(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Store and remove calls only.
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Store(..) | Call::Remove(_)))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, key: &str) -> StorageResult<()> {
        if self.failing.lock().unwrap().contains(key) {
            return Err(StorageError::InvalidRecord(format!("injected failure for {key}")));
        }
        Ok(())
    }

    fn delay(&self, key: &str) -> Option<Duration> {
        self.delays.lock().unwrap().get(key).copied()
    }
}

#[async_trait]
impl EntityPersistenceDao<Note> for CountingDao {
    async fn load_stored(&self) -> StorageResult<LoadReport<Note>> {
        self.record(Call::Load);
        if self.fail_load {
            return Err(StorageError::Io(std::io::Error::other("store unavailable")));
        }
        self.inner.load_stored().await
    }

    async fn resolve(&self, key: &str) -> StorageResult<ResolveResult<Note>> {
        self.record(Call::Resolve(key.to_string()));
        self.inner.resolve(key).await
    }

    async fn store(&self, entity: &Entity<Note>, key: &str) -> StorageResult<()> {
        let title = entity.data.as_ref().map(|n| n.title.clone()).unwrap_or_default();
        self.record(Call::Store(key.to_string(), title));
        if let Some(delay) = self.delay(key) {
            tokio::time::sleep(delay).await;
        }
        self.check(key)?;
        self.inner.store(entity, key).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.record(Call::Remove(key.to_string()));
        self.check(key)?;
        self.inner.remove(key).await
    }
}

/// Factory handing out one shared [`CountingDao`].
pub fn factory(dao: Arc<CountingDao>) -> DaoFactory<Note> {
    Arc::new(move |_: &Path| -> StorageResult<Arc<dyn EntityPersistenceDao<Note>>> {
        let dao: Arc<dyn EntityPersistenceDao<Note>> = dao.clone();
        Ok(dao)
    })
}

/// Backend preloaded with the given `(key, title)` records.
pub async fn seeded_backend(records: &[(&str, &str)]) -> MemoryBackend {
    let backend = MemoryBackend::new();
    let seed = MemoryPersistence::<Note>::with_backend(backend.clone());
    for (key, title) in records {
        seed.store(&Entity::resolved(*key, note(title)), key)
            .await
            .unwrap();
    }
    backend
}

/// A collection plus a service over a counting store on `backend`.
pub struct Harness {
    pub collection: Arc<EntityCollection<Note>>,
    pub dao: Arc<CountingDao>,
    pub service: PersistenceService<Note>,
}

impl Harness {
    pub fn new(backend: MemoryBackend) -> Self {
        Self::with_dao(Arc::new(CountingDao::new(backend)))
    }

    pub fn with_dao(dao: Arc<CountingDao>) -> Self {
        Self::with_config(dao, PersistenceConfig::new("test.Note").with_directory("/unused"))
    }

    pub fn with_config(dao: Arc<CountingDao>, config: PersistenceConfig) -> Self {
        init_tracing();
        let collection = Arc::new(EntityCollection::new());
        let service = PersistenceService::new(config, collection.clone(), factory(dao.clone()));
        Self {
            collection,
            dao,
            service,
        }
    }

    pub fn title(&self, key: &str) -> Option<String> {
        use entipersist_service::HasEntities;
        self.collection
            .get_entity(key)
            .and_then(|e| e.data)
            .map(|n| n.title)
    }
}

/// Collects events until `count` have arrived.
pub async fn next_events(
    rx: &mut broadcast::Receiver<PersistenceEvent>,
    count: usize,
) -> Vec<PersistenceEvent> {
    let mut events = Vec::with_capacity(count);
    while events.len() < count {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        events.push(event);
    }
    events
}

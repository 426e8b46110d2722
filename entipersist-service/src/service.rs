//! Persistence lifecycle service.
//!
//! Binds one store to one live collection. On `start` the stored entities
//! are loaded and handed to the collection as a single batch; afterwards
//! every collection change is mirrored to the store through a keyed write
//! queue.
//!
//! ```text
//! Uninitialized --start--> Loading --batch published--> Ready
//! ```

use crate::collection::HasEntities;
use crate::config::PersistenceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::events::{LifecycleState, PersistenceEvent};
use crate::queue::{KeyedWriteQueue, WriteOp};
use entipersist_dao::{
    EntityPersistenceDao, FsDirectoryPersistence, LoadReport, ResolveRequest, StorageResult,
};
use entipersist_types::{EntityNotification, ResolveResult, ResolvedMultiple};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builds the store for a storage directory.
pub type DaoFactory<D> =
    Arc<dyn Fn(&Path) -> StorageResult<Arc<dyn EntityPersistenceDao<D>>> + Send + Sync>;

/// Command sent to the notification listener.
enum ListenerCommand {
    /// Enqueue every notification received so far, then acknowledge.
    Flush(oneshot::Sender<()>),
    /// Like `Flush`, then stop listening.
    Stop(oneshot::Sender<()>),
}

/// Background tasks of a started service.
struct Running<D> {
    queue: KeyedWriteQueue<D>,
    dispatcher: JoinHandle<()>,
    listener: JoinHandle<()>,
    control: mpsc::UnboundedSender<ListenerCommand>,
}

/// Mirrors a [`HasEntities`] collection to an [`EntityPersistenceDao`].
pub struct PersistenceService<D> {
    config: PersistenceConfig,
    entities: Arc<dyn HasEntities<D>>,
    dao_factory: DaoFactory<D>,
    dao: OnceLock<Arc<dyn EntityPersistenceDao<D>>>,
    directory: OnceLock<PathBuf>,
    ignore_updates: Arc<AtomicBool>,
    started: AtomicBool,
    state: watch::Sender<LifecycleState>,
    events: broadcast::Sender<PersistenceEvent>,
    running: Mutex<Option<Running<D>>>,
}

impl<D> PersistenceService<D>
where
    D: Send + Sync + 'static,
{
    /// Creates a service that builds its store with `dao_factory` once the
    /// storage directory is known.
    pub fn new(
        config: PersistenceConfig,
        entities: Arc<dyn HasEntities<D>>,
        dao_factory: DaoFactory<D>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Uninitialized);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            entities,
            dao_factory,
            dao: OnceLock::new(),
            directory: OnceLock::new(),
            ignore_updates: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            state,
            events,
            running: Mutex::new(None),
        }
    }

    /// Creates a service over a JSON [`FsDirectoryPersistence`].
    pub fn with_fs_json(config: PersistenceConfig, entities: Arc<dyn HasEntities<D>>) -> Self
    where
        D: Serialize + DeserializeOwned + Clone,
    {
        let factory: DaoFactory<D> = Arc::new(
            |directory: &Path| -> StorageResult<Arc<dyn EntityPersistenceDao<D>>> {
                let dao: Arc<dyn EntityPersistenceDao<D>> =
                    Arc::new(FsDirectoryPersistence::<D>::new(directory));
                Ok(dao)
            },
        );
        Self::new(config, entities, factory)
    }

    /// Loads the stored entities into the collection and starts mirroring
    /// changes. Can only succeed once.
    ///
    /// A failure to derive the directory or build the store leaves the
    /// service `Uninitialized`, and `start` may be retried. Once loading has
    /// begun nothing fails the startup: an unreadable store loads as empty
    /// and a rejected batch is reported as [`PersistenceEvent::PublishFailed`].
    pub async fn start(&self) -> ServiceResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::AlreadyStarted);
        }

        let (directory, dao) = match self.open_store() {
            Ok(opened) => opened,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let _ = self.directory.set(directory.clone());
        let _ = self.dao.set(Arc::clone(&dao));

        self.state.send_replace(LifecycleState::Loading);
        info!(
            entity_type = %self.config.entity_type,
            directory = %directory.display(),
            "loading stored entities"
        );

        let report = match dao.load_stored().await {
            Ok(report) => report,
            Err(e) => {
                error!(directory = %directory.display(), error = %e, "failed to enumerate stored entities");
                LoadReport::default()
            }
        };
        let loaded = report.loaded.len();
        let skipped = report.skipped.len();
        let known: HashSet<String> = report.loaded.iter().map(|r| r.key.clone()).collect();

        self.publish_batch(report.into_batch());

        let notifications = self.entities.subscribe();
        let (queue, dispatcher) = KeyedWriteQueue::spawn(Arc::clone(&dao), self.events.clone());
        let (control, control_rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(run_listener(
            notifications,
            control_rx,
            Listener {
                entities: Arc::clone(&self.entities),
                ignore_updates: Arc::clone(&self.ignore_updates),
                queue: queue.clone(),
                events: self.events.clone(),
                known,
            },
        ));

        *self.running.lock().await = Some(Running {
            queue,
            dispatcher,
            listener,
            control,
        });

        self.state.send_replace(LifecycleState::Ready);
        let _ = self.events.send(PersistenceEvent::LoadComplete {
            entity_type: self.config.entity_type.clone(),
            loaded,
            skipped,
        });
        info!(entity_type = %self.config.entity_type, loaded, skipped, "persistence ready");
        Ok(())
    }

    fn open_store(&self) -> ServiceResult<(PathBuf, Arc<dyn EntityPersistenceDao<D>>)> {
        let directory = self.config.entity_directory()?;
        let dao = (self.dao_factory)(&directory)?;
        Ok((directory, dao))
    }

    /// Hands the loaded batch to the collection with `ignore_updates` set, so
    /// the notifications it triggers are not written back.
    fn publish_batch(&self, batch: ResolvedMultiple<D>) {
        let count = batch.len();
        self.ignore_updates.store(true, Ordering::SeqCst);

        let entities = &self.entities;
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| entities.resolved_multiple(batch)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("collection panicked while merging batch".to_string()),
        };

        self.ignore_updates.store(false, Ordering::SeqCst);

        match failure {
            None => debug!(count, "published loaded batch"),
            Some(error) => {
                error!(count, error = %error, "failed to publish loaded batch");
                let _ = self.events.send(PersistenceEvent::PublishFailed { error });
            }
        }
    }

    /// Resolves `key` against the store without touching the collection.
    ///
    /// Fails with [`ServiceError::NotStarted`] until `start` has created the
    /// store.
    pub fn resolve(&self, key: impl Into<String>) -> ServiceResult<ResolveRequest<D>> {
        Ok(ResolveRequest::spawn(self.started_dao()?, key))
    }

    /// Like [`resolve`](Self::resolve), running `callback` with the outcome
    /// unless the request is cancelled first.
    pub fn resolve_with_callback<F>(
        &self,
        key: impl Into<String>,
        callback: F,
    ) -> ServiceResult<ResolveRequest<D>>
    where
        F: FnOnce(&StorageResult<ResolveResult<D>>) + Send + 'static,
    {
        Ok(ResolveRequest::spawn_with_callback(
            self.started_dao()?,
            key,
            callback,
        ))
    }

    fn started_dao(&self) -> ServiceResult<Arc<dyn EntityPersistenceDao<D>>> {
        self.dao.get().cloned().ok_or(ServiceError::NotStarted)
    }

    /// The store, once `start` has created it.
    pub fn dao(&self) -> Option<Arc<dyn EntityPersistenceDao<D>>> {
        self.dao.get().cloned()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watches lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Waits for the initial load to complete.
    pub async fn wait_until_ready(&self) -> ServiceResult<()> {
        let mut rx = self.state.subscribe();
        rx.wait_for(|state| *state == LifecycleState::Ready)
            .await
            .map(|_| ())
            .map_err(|_| ServiceError::ChannelClosed)
    }

    /// Subscribes to service events. Only events sent after the call are
    /// received.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PersistenceEvent> {
        self.events.subscribe()
    }

    /// Storage directory, once `start` has derived it.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.get().map(PathBuf::as_path)
    }

    /// Whether collection updates are currently being ignored (true only
    /// while the loaded batch is being published).
    pub fn is_ignoring_updates(&self) -> bool {
        self.ignore_updates.load(Ordering::SeqCst)
    }

    /// The configuration the service was created with.
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Number of queued writes that have not completed.
    pub async fn pending_writes(&self) -> usize {
        self.running
            .lock()
            .await
            .as_ref()
            .map_or(0, |running| running.queue.outstanding())
    }

    /// Waits until every collection change received so far has been written
    /// (or has failed). Returns immediately when not running.
    pub async fn flush(&self) -> ServiceResult<()> {
        let handles = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|running| (running.queue.clone(), running.control.clone()));
        let Some((queue, control)) = handles else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if control.send(ListenerCommand::Flush(ack_tx)).is_ok() {
            // A listener that stopped on its own has nothing left to enqueue.
            let _ = ack_rx.await;
        }
        queue.flush().await
    }

    /// Stops listening to the collection, waits for queued writes to finish
    /// and stops the workers. The service stays in its last state; it cannot
    /// be started again.
    pub async fn shutdown(&self) -> ServiceResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        let Running {
            queue,
            dispatcher,
            listener,
            control,
        } = running;

        let (ack_tx, ack_rx) = oneshot::channel();
        if control.send(ListenerCommand::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = listener.await {
            warn!(error = %e, "notification listener ended abnormally");
        }

        queue.flush().await?;
        drop(queue);
        if let Err(e) = dispatcher.await {
            warn!(error = %e, "write dispatcher ended abnormally");
        }

        info!(entity_type = %self.config.entity_type, "persistence stopped");
        Ok(())
    }
}

impl<D> Drop for PersistenceService<D> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.listener.abort();
        }
    }
}

async fn run_listener<D>(
    mut notifications: broadcast::Receiver<EntityNotification>,
    mut control: mpsc::UnboundedReceiver<ListenerCommand>,
    mut listener: Listener<D>,
) where
    D: Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            command = control.recv() => {
                let Some(command) = command else { break };
                listener.drain(&mut notifications);
                match command {
                    ListenerCommand::Flush(ack) => {
                        let _ = ack.send(());
                    }
                    ListenerCommand::Stop(ack) => {
                        let _ = ack.send(());
                        break;
                    }
                }
            }
            received = notifications.recv() => match received {
                Ok(notification) => listener.handle(notification),
                Err(RecvError::Lagged(missed)) => listener.resync(missed),
                Err(RecvError::Closed) => {
                    debug!("collection notification channel closed");
                    break;
                }
            },
        }
    }
    debug!("notification listener stopped");
}

/// Turns collection notifications into queued writes.
struct Listener<D> {
    entities: Arc<dyn HasEntities<D>>,
    ignore_updates: Arc<AtomicBool>,
    queue: KeyedWriteQueue<D>,
    events: broadcast::Sender<PersistenceEvent>,
    /// Keys loaded at startup or written since; removal candidates on resync.
    known: HashSet<String>,
}

impl<D> Listener<D>
where
    D: Send + Sync + 'static,
{
    /// Handles every notification already buffered.
    fn drain(&mut self, notifications: &mut broadcast::Receiver<EntityNotification>) {
        loop {
            match notifications.try_recv() {
                Ok(notification) => self.handle(notification),
                Err(TryRecvError::Lagged(missed)) => self.resync(missed),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn handle(&mut self, notification: EntityNotification) {
        match notification {
            EntityNotification::Updated(key) => {
                if self.ignore_updates.load(Ordering::SeqCst) {
                    debug!(key = %key, "ignoring update during batch publish");
                    return;
                }
                self.store_current(key);
            }
            EntityNotification::Removed(key) => self.submit(WriteOp::Remove { key }),
        }
    }

    /// Notifications were dropped: queue a store for every resolved entity
    /// and a remove for every known key the collection no longer has.
    fn resync(&mut self, missed: u64) {
        warn!(missed, "collection notifications lagged; rescanning collection");
        let _ = self.events.send(PersistenceEvent::NotificationsLagged { missed });

        let mut current = self.entities.entity_keys();
        current.sort();
        let present: HashSet<&str> = current.iter().map(String::as_str).collect();

        let mut gone: Vec<String> = self
            .known
            .iter()
            .filter(|key| !present.contains(key.as_str()))
            .cloned()
            .collect();
        gone.sort();

        for key in gone {
            self.submit(WriteOp::Remove { key });
        }
        for key in current {
            self.store_current(key);
        }
    }

    fn store_current(&mut self, key: String) {
        match self.entities.get_entity(&key) {
            Some(entity) if entity.has_resolved() => self.submit(WriteOp::Store { key, entity }),
            Some(_) => debug!(key = %key, "skipping update of unresolved entity"),
            None => debug!(key = %key, "skipping update of missing entity"),
        }
    }

    fn submit(&mut self, op: WriteOp<D>) {
        match &op {
            WriteOp::Store { key, .. } => {
                self.known.insert(key.clone());
            }
            WriteOp::Remove { key } => {
                self.known.remove(key);
            }
        }
        // Failure is already logged by the queue.
        let _ = self.queue.enqueue(op);
    }
}

//! Keyed write queue.
//!
//! Writes for one key run strictly in the order they were enqueued; writes
//! for different keys run concurrently. A dispatcher task owns the routing
//! table and hands each operation to the lane task of its key, spawning a
//! lane when a key gets work and retiring it once the lane has drained.

use crate::error::{ServiceError, ServiceResult};
use crate::events::{PersistenceEvent, WriteKind};
use entipersist_dao::EntityPersistenceDao;
use entipersist_types::Entity;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// A write against the store.
#[derive(Debug, Clone)]
pub(crate) enum WriteOp<D> {
    Store { key: String, entity: Entity<D> },
    Remove { key: String },
}

impl<D> WriteOp<D> {
    pub(crate) fn key(&self) -> &str {
        match self {
            Self::Store { key, .. } | Self::Remove { key } => key,
        }
    }

    pub(crate) fn kind(&self) -> WriteKind {
        match self {
            Self::Store { .. } => WriteKind::Store,
            Self::Remove { .. } => WriteKind::Remove,
        }
    }
}

/// Handle for enqueueing writes. Cloning shares the same queue; the
/// dispatcher stops once every handle is dropped and all lanes drained.
pub(crate) struct KeyedWriteQueue<D> {
    tx: mpsc::UnboundedSender<WriteOp<D>>,
    /// Operations enqueued but not yet completed.
    outstanding: Arc<watch::Sender<usize>>,
}

impl<D> Clone for KeyedWriteQueue<D> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            outstanding: Arc::clone(&self.outstanding),
        }
    }
}

struct Lane<D> {
    tx: mpsc::UnboundedSender<WriteOp<D>>,
    pending: usize,
}

impl<D> KeyedWriteQueue<D>
where
    D: Send + Sync + 'static,
{
    /// Starts the dispatcher. Results of each write are published on
    /// `events`.
    pub(crate) fn spawn(
        dao: Arc<dyn EntityPersistenceDao<D>>,
        events: broadcast::Sender<PersistenceEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0usize);
        let outstanding = Arc::new(outstanding);

        let dispatcher = tokio::spawn(run_dispatcher(rx, dao, events, Arc::clone(&outstanding)));
        (Self { tx, outstanding }, dispatcher)
    }

    /// Queues `op` behind any earlier writes for the same key.
    pub(crate) fn enqueue(&self, op: WriteOp<D>) -> ServiceResult<()> {
        self.outstanding.send_modify(|n| *n += 1);
        if let Err(mpsc::error::SendError(op)) = self.tx.send(op) {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            error!(key = %op.key(), kind = %op.kind(), "write queue closed, dropping write");
            return Err(ServiceError::ChannelClosed);
        }
        Ok(())
    }

    /// Number of writes enqueued and not yet completed.
    pub(crate) fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Waits until every write enqueued so far has completed.
    pub(crate) async fn flush(&self) -> ServiceResult<()> {
        let mut rx = self.outstanding.subscribe();
        rx.wait_for(|n| *n == 0)
            .await
            .map(|_| ())
            .map_err(|_| ServiceError::ChannelClosed)
    }
}

async fn run_dispatcher<D>(
    mut rx: mpsc::UnboundedReceiver<WriteOp<D>>,
    dao: Arc<dyn EntityPersistenceDao<D>>,
    events: broadcast::Sender<PersistenceEvent>,
    outstanding: Arc<watch::Sender<usize>>,
) where
    D: Send + Sync + 'static,
{
    let mut lanes: HashMap<String, Lane<D>> = HashMap::new();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            op = rx.recv() => {
                let Some(op) = op else { break };
                let key = op.key().to_string();

                let lane = lanes.entry(key.clone()).or_insert_with(|| {
                    trace!(key = %key, "opening write lane");
                    let (lane_tx, lane_rx) = mpsc::unbounded_channel();
                    tokio::spawn(run_lane(
                        key.clone(),
                        lane_rx,
                        Arc::clone(&dao),
                        events.clone(),
                        Arc::clone(&outstanding),
                        done_tx.clone(),
                    ));
                    Lane { tx: lane_tx, pending: 0 }
                });

                lane.pending += 1;
                if let Err(mpsc::error::SendError(op)) = lane.tx.send(op) {
                    // Lane task is gone; count the write as finished so flush
                    // does not hang.
                    error!(key = %op.key(), kind = %op.kind(), "write lane closed, dropping write");
                    outstanding.send_modify(|n| *n = n.saturating_sub(1));
                    lanes.remove(&key);
                }
            }
            Some(key) = done_rx.recv() => {
                if let Some(lane) = lanes.get_mut(&key) {
                    lane.pending = lane.pending.saturating_sub(1);
                    if lane.pending == 0 {
                        trace!(key = %key, "retiring write lane");
                        lanes.remove(&key);
                    }
                }
            }
        }
    }

    // Dropping the lane senders lets each lane finish what it holds.
    lanes.clear();
    debug!("write dispatcher stopped");
}

async fn run_lane<D>(
    key: String,
    mut rx: mpsc::UnboundedReceiver<WriteOp<D>>,
    dao: Arc<dyn EntityPersistenceDao<D>>,
    events: broadcast::Sender<PersistenceEvent>,
    outstanding: Arc<watch::Sender<usize>>,
    done_tx: mpsc::UnboundedSender<String>,
) where
    D: Send + Sync + 'static,
{
    while let Some(op) = rx.recv().await {
        let event = execute(dao.as_ref(), op).await;
        let _ = events.send(event);

        outstanding.send_modify(|n| *n = n.saturating_sub(1));
        // The dispatcher may already be gone during shutdown.
        let _ = done_tx.send(key.clone());
    }
}

/// Runs one write, turning every failure (including a panicking store) into
/// a `WriteFailed` event.
async fn execute<D>(dao: &dyn EntityPersistenceDao<D>, op: WriteOp<D>) -> PersistenceEvent
where
    D: Send + Sync + 'static,
{
    let kind = op.kind();
    let result = match &op {
        WriteOp::Store { key, entity } => AssertUnwindSafe(dao.store(entity, key)).catch_unwind().await,
        WriteOp::Remove { key } => AssertUnwindSafe(dao.remove(key)).catch_unwind().await,
    };

    let key = op.key().to_string();
    let error = match result {
        Ok(Ok(())) => {
            debug!(key = %key, %kind, "write applied");
            return match kind {
                WriteKind::Store => PersistenceEvent::Stored { key },
                WriteKind::Remove => PersistenceEvent::Removed { key },
            };
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => "write panicked".to_string(),
    };

    error!(key = %key, %kind, error = %error, "write failed");
    PersistenceEvent::WriteFailed { key, kind, error }
}

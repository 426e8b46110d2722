//! Pending single-key lookups.

use crate::dao::EntityPersistenceDao;
use crate::error::{StorageError, StorageResult};
use entipersist_types::ResolveResult;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::debug;

/// Callback invoked with the outcome of a resolve, unless it was cancelled.
pub type ResolveCallback<D> = Box<dyn FnOnce(&StorageResult<ResolveResult<D>>) + Send + 'static>;

/// A resolve running in the background.
///
/// The lookup starts as soon as the request is created; the caller never
/// blocks. Await the request for the result, or [`cancel`](Self::cancel) it.
/// A cancelled request resolves to [`StorageError::Cancelled`] and never runs
/// its callback. Dropping the request cancels it as well. Must be created
/// inside a tokio runtime.
pub struct ResolveRequest<D> {
    key: String,
    handle: JoinHandle<StorageResult<ResolveResult<D>>>,
}

impl<D> ResolveRequest<D>
where
    D: Send + Sync + 'static,
{
    /// Starts resolving `key` against `dao`.
    pub fn spawn(dao: Arc<dyn EntityPersistenceDao<D>>, key: impl Into<String>) -> Self {
        Self::spawn_inner(dao, key.into(), None)
    }

    /// Starts resolving `key` and runs `callback` with the outcome.
    pub fn spawn_with_callback<F>(
        dao: Arc<dyn EntityPersistenceDao<D>>,
        key: impl Into<String>,
        callback: F,
    ) -> Self
    where
        F: FnOnce(&StorageResult<ResolveResult<D>>) + Send + 'static,
    {
        Self::spawn_inner(dao, key.into(), Some(Box::new(callback)))
    }

    fn spawn_inner(
        dao: Arc<dyn EntityPersistenceDao<D>>,
        key: String,
        callback: Option<ResolveCallback<D>>,
    ) -> Self {
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = dao.resolve(&task_key).await;
            debug!(key = %task_key, found = matches!(result, Ok(ResolveResult::Found(_))), "resolve finished");
            if let Some(callback) = callback {
                callback(&result);
            }
            result
        });
        Self { key, handle }
    }
}

impl<D> ResolveRequest<D> {
    /// The key being resolved.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cancels the lookup. Has no effect once it has finished.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the lookup has completed (or been cancelled).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<D> Drop for ResolveRequest<D> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl<D> Future for ResolveRequest<D> {
    type Output = StorageResult<ResolveResult<D>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => {
                Poll::Ready(Err(StorageError::Cancelled(format!("resolve {}", this.key))))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(StorageError::TaskFailed(e.to_string()))),
        }
    }
}

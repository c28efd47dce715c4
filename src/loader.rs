use std::fmt::Debug;
use std::ops::Drop;

use futures::future;
use tokio::sync::{mpsc, oneshot};

use crate::{
    batch_function::BatchFunction,
    config::LoaderConfig,
    error::LoadError,
    loader_op::{LoaderOp, PendingEntry},
    loader_worker::LoaderWorker,
    worker_stats::DispatchStats,
};

/// Batch loads values from some expensive resource, primarily intended for mitigating the N+1
/// problem.
///
/// Users call [`Loader::load`] and [`Loader::load_many`] to fetch values from the underlying
/// resource. Every key requested during one scheduling turn (see [`Schedule`](crate::Schedule))
/// is handed to the `BatchFunction` in a single call, in request order, and each caller receives
/// the value at its own key's position. The loader does not cache or deduplicate: requesting the
/// same key twice in a turn puts it in the batch twice. See
/// [`CachedLoader`](crate::CachedLoader) for that.
///
/// The `Loader` struct acts as an intermediary between the async domain in which `load` calls are
/// invoked and the pseudo-single-threaded domain of the `LoaderWorker`. Callers can invoke the
/// `Loader` from multiple concurrent tasks, and the loader will enqueue each key on the request
/// queue for processing by its `LoaderWorker`. The worker buffers the keys and resolves each
/// request through its own oneshot channel once the batch containing it completes.
pub struct Loader<K, V>
where
    K: 'static + Debug + Send + Sync,
    V: 'static + Send + Debug,
{
    request_tx: mpsc::UnboundedSender<LoaderOp<K, V>>,
    load_task_handle: tokio::task::JoinHandle<()>,
}

/// Aborts the worker. Entries it still buffers lose their result cell, so a receiver that outlives
/// the loader resolves with [`LoadError::Canceled`] instead of waiting forever. Dispatches already
/// spawned run to completion.
impl<K, V> Drop for Loader<K, V>
where
    K: 'static + Debug + Send + Sync,
    V: 'static + Send + Debug,
{
    fn drop(&mut self) {
        self.load_task_handle.abort();
    }
}

impl<K, V> Loader<K, V>
where
    K: 'static + Debug + Send + Sync,
    V: 'static + Send + Debug,
{
    /// Creates a new Loader for the provided BatchFunction and Context type, using the default
    /// [`LoaderConfig`].
    ///
    /// Note: the batch function is passed in as a marker for type inference. Must be called from
    /// within a tokio runtime.
    pub fn new<F, ContextT>(batch_fn: F, context: ContextT) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    {
        Self::with_config(batch_fn, context, LoaderConfig::default())
    }

    /// Creates a new Loader with explicit scheduling and batch size settings.
    pub fn with_config<F, ContextT>(_: F, context: ContextT, config: LoaderConfig) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            request_tx: tx,
            load_task_handle: tokio::task::spawn(
                LoaderWorker::<K, V, F, ContextT>::new(rx, context, config).start(),
            ),
        }
    }

    /// Loads a value from the underlying resource.
    ///
    /// The key is enqueued for the current scheduling turn and the call suspends until the batch
    /// containing it resolves. Fails with the batch's error if the dispatch failed.
    pub async fn load(&self, key: K) -> Result<V, LoadError> {
        let response_rx = self.enqueue(key)?;
        response_rx.await.map_err(|_| LoadError::Canceled)?
    }

    /// Loads many values at once.
    ///
    /// Each key becomes its own pending request within the same turn, so `keys` (along with any
    /// other concurrent requests) is loaded through a single batch. Values are returned in key
    /// order.
    pub async fn load_many(&self, keys: Vec<K>) -> Result<Vec<V>, LoadError> {
        future::try_join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// Returns a snapshot of the worker's dispatch counters.
    pub async fn stats(&self) -> Result<DispatchStats, LoadError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(LoaderOp::Stats(response_tx))
            .map_err(|_| LoadError::WorkerStopped)?;
        response_rx.await.map_err(|_| LoadError::WorkerStopped)
    }

    /// Puts `key` on the worker's queue right away and returns the cell its value will arrive in.
    pub(crate) fn enqueue(
        &self,
        key: K,
    ) -> Result<oneshot::Receiver<Result<V, LoadError>>, LoadError> {
        let (entry, response_rx) = PendingEntry::new(key);
        self.request_tx.send(LoaderOp::Load(entry)).map_err(|_| LoadError::WorkerStopped)?;
        Ok(response_rx)
    }
}

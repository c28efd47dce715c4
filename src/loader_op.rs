use tokio::sync::oneshot;

use crate::{error::LoadError, worker_stats::DispatchStats};

/// Set of possible requests that can be sent to the `LoaderWorker`.
#[derive(Debug)]
pub enum LoaderOp<K, V> {
    /// Buffer a key for the next dispatch.
    Load(PendingEntry<K, V>),
    /// Report the worker's counters.
    Stats(oneshot::Sender<DispatchStats>),
}

/// One outstanding request: the key, and the one-shot cell its caller is awaiting.
///
/// Consumed exactly once, when the dispatch it belongs to resolves or fails.
#[derive(Debug)]
pub struct PendingEntry<K, V> {
    pub key: K,
    pub response_tx: oneshot::Sender<Result<V, LoadError>>,
}

impl<K, V> PendingEntry<K, V> {
    pub fn new(key: K) -> (Self, oneshot::Receiver<Result<V, LoadError>>) {
        let (response_tx, response_rx) = oneshot::channel();
        (Self { key, response_tx }, response_rx)
    }
}

/// Delivers `response` to a waiting requester.
pub(crate) fn send_response<V>(
    response_tx: oneshot::Sender<Result<V, LoadError>>,
    response: Result<V, LoadError>,
) where
    V: std::fmt::Debug,
{
    if let Err(unsent) = response_tx.send(response) {
        tracing::warn!(?unsent, "receiver dropped");
    }
}

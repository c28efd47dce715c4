use std::fmt::Debug;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::Level;
use tracing_futures::Instrument;

use crate::{
    batch_function::BatchFunction,
    config::{LoaderConfig, Schedule},
    error::LoadError,
    loader_op::{send_response, LoaderOp, PendingEntry},
    worker_stats::DispatchStats,
};

/// Upper bound on consecutive `Schedule::Yield` rounds in one turn, so a steady stream of requests
/// cannot postpone a flush forever.
const MAX_YIELD_ROUNDS: usize = 32;

/// A `LoaderWorker` is the "single-thread" worker task that owns the pending buffer.
///
/// Once started, it runs in a loop until the parent Loader aborts its `JoinHandle` or drops the
/// request queue tx channel.
///
/// The worker can be in one of three states during its lifetime:
///
/// 1. Waiting for requests.
/// 2. Waiting for the end of the scheduling turn that the first buffered request opened.
/// 3. Flushing: draining the request queue into the buffer and handing the buffer off to a
///    dispatch task.
///
/// One cycle through this loop may be called a "scheduling turn".
///
/// In state (1), the worker awaits any message on the request queue channel, idling until work
/// arrives. A Load request is appended to the pending buffer and, if the buffer was empty, marks
/// a dispatch as scheduled.
///
/// In state (2), the worker awaits its configured [`Schedule`](crate::Schedule) so that every
/// request issued in the current turn gets a chance to reach the queue. Under `Schedule::Yield`
/// it keeps yielding and draining until a yield brings in no new requests.
///
/// In state (3), the worker synchronously pulls requests from the queue until there are no more
/// pending, swaps the buffer for an empty one, clears the scheduled flag and spawns a dispatch
/// task per batch. The dispatch awaits the `BatchFunction` and resolves each entry by position.
/// Since the buffer is swapped out before the batch function runs, requests arriving while a
/// dispatch is in flight open a new turn rather than joining that dispatch.
pub struct LoaderWorker<K, V, F, ContextT>
where
    K: 'static + Debug + Send + Sync,
    V: 'static + Send + Debug,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    ContextT: Send + Sync + 'static,
{
    request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V>>,
    pending: Vec<PendingEntry<K, V>>,
    dispatch_scheduled: bool,
    context: Arc<ContextT>,
    config: LoaderConfig,
    stats: DispatchStats,
    phantom_batch_function: PhantomData<F>,
    debug_name: &'static str,
}

impl<K, V, F, ContextT> LoaderWorker<K, V, F, ContextT>
where
    K: 'static + Debug + Send + Sync,
    V: 'static + Send + Debug,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    ContextT: Send + Sync + 'static,
{
    pub fn new(
        request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V>>,
        context: ContextT,
        config: LoaderConfig,
    ) -> Self {
        let debug_name = std::any::type_name::<F>();
        Self {
            request_rx,
            pending: Vec::new(),
            dispatch_scheduled: false,
            context: Arc::new(context),
            config,
            stats: DispatchStats::new(debug_name),
            phantom_batch_function: PhantomData,
            debug_name,
        }
    }

    pub async fn start(mut self) {
        let span = tracing::span!(Level::TRACE, "LoaderWorker", batch_fn = self.debug_name);
        async move {
            loop {
                match self.request_rx.recv().await {
                    None => {
                        tracing::info!("Tx channel closed. Terminating LoaderWorker.");
                        break;
                    }
                    Some(op) => self.mux_op(op),
                }
                if !self.dispatch_scheduled {
                    continue;
                }
                self.collect_turn().await;
                self.flush();
            }
            tracing::debug!(worker_stats = ?self.stats);
        }
        .instrument(span)
        .await
    }

    /// Waits for the end of the current scheduling turn, buffering every op that arrives in it.
    async fn collect_turn(&mut self) {
        let schedule = self.config.schedule;
        match schedule {
            Schedule::Yield => {
                // On a multi-thread runtime the requester may still be sending sibling keys from
                // another thread, so keep yielding until a yield brings in nothing new.
                for _ in 0..MAX_YIELD_ROUNDS {
                    tokio::task::yield_now().await;
                    if self.drain_queue() == 0 {
                        return;
                    }
                }
                tracing::debug!(rounds = MAX_YIELD_ROUNDS, "requests still arriving, flushing");
            }
            Schedule::Delay(window) => {
                tokio::time::sleep(window).await;
                self.drain_queue();
            }
        }
    }

    /// Pulls every op already queued without waiting. `try_recv` ignores the coop budget.
    fn drain_queue(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(op) = self.request_rx.try_recv() {
            self.mux_op(op);
            drained += 1;
        }
        drained
    }

    fn mux_op(&mut self, op: LoaderOp<K, V>) {
        match op {
            LoaderOp::Load(entry) => {
                tracing::trace!(key = ?entry.key, buffered = self.pending.len(), "buffering key");
                self.stats.record_load_request();
                self.pending.push(entry);
                if !self.dispatch_scheduled {
                    tracing::trace!("scheduling flush");
                    self.dispatch_scheduled = true;
                }
            }
            LoaderOp::Stats(response_tx) => {
                if response_tx.send(self.stats.clone()).is_err() {
                    tracing::warn!("stats receiver dropped");
                }
            }
        }
    }

    fn flush(&mut self) {
        let mut entries = mem::take(&mut self.pending);
        self.dispatch_scheduled = false;
        if entries.is_empty() {
            tracing::trace!("nothing buffered, skipping dispatch");
            return;
        }

        while !entries.is_empty() {
            let rest = entries.split_off(self.config.chunk_len(entries.len()));
            let batch = mem::replace(&mut entries, rest);
            self.stats.record_dispatch(batch.len());
            let span = tracing::debug_span!(
                "dispatch",
                seq = self.stats.dispatches,
                batch_size = batch.len()
            );
            let context = Arc::clone(&self.context);
            tokio::spawn(dispatch::<K, V, F, ContextT>(batch, context).instrument(span));
        }
    }
}

/// Runs one batch through `F` and resolves every entry of it, by position.
async fn dispatch<K, V, F, ContextT>(batch: Vec<PendingEntry<K, V>>, context: Arc<ContextT>)
where
    K: 'static + Debug + Send + Sync,
    V: 'static + Send + Debug,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    ContextT: Send + Sync + 'static,
{
    let (keys, receivers): (Vec<K>, Vec<_>) =
        batch.into_iter().map(|entry| (entry.key, entry.response_tx)).unzip();
    tracing::debug!(?keys);

    match F::load(&keys, &context).await {
        Ok(values) if values.len() == keys.len() => {
            for (response_tx, value) in receivers.into_iter().zip(values) {
                send_response(response_tx, Ok(value));
            }
        }
        Ok(values) => {
            let err = LoadError::LengthMismatch { expected: keys.len(), actual: values.len() };
            tracing::error!(%err, "batch function broke its length contract");
            fail_all(receivers, err);
        }
        Err(e) => {
            tracing::error!(error = %e, "batch function failed");
            fail_all(receivers, LoadError::batch(e));
        }
    }
}

fn fail_all<V>(
    receivers: Vec<tokio::sync::oneshot::Sender<Result<V, LoadError>>>,
    err: LoadError,
) where
    V: Debug,
{
    for response_tx in receivers {
        send_response(response_tx, Err(err.clone()));
    }
}

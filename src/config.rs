use std::num::NonZeroUsize;
use std::time::Duration;

/// When the worker ends a scheduling turn and flushes its pending buffer.
///
/// The turn starts when the first request arrives at an idle worker. Every request queued before
/// the turn ends is folded into the same flush; later requests start the next turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// Yield to the tokio scheduler and drain the queue, repeating until a yield brings in no new
    /// requests, then flush.
    ///
    /// Collects all requests made by tasks that run before the worker is polled again, e.g. all
    /// the futures of a `join_all` fan-out, including on a multi-thread runtime where the
    /// requester keeps sending from another thread while the worker is already awake.
    #[default]
    Yield,
    /// Sleep for the given window, then flush. Collects requests made from other tasks and timers
    /// during the window at the cost of that much added latency.
    Delay(Duration),
}

/// Tuning for a [`Loader`](crate::Loader).
#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    pub schedule: Schedule,
    /// Upper bound on keys per batch function call. A flush holding more entries is split into
    /// consecutive dispatches, in order. Unbounded when `None`.
    pub max_batch_size: Option<NonZeroUsize>,
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Sets the maximum batch size. Zero means unbounded.
    pub fn max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = NonZeroUsize::new(max);
        self
    }

    /// Chunk length to use when flushing `pending` entries.
    pub(crate) fn chunk_len(&self, pending: usize) -> usize {
        match self.max_batch_size {
            Some(max) => max.get().min(pending),
            None => pending,
        }
    }
}

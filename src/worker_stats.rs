/// Counters kept by a loader's worker, returned by [`Loader::stats`](crate::Loader::stats).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchStats {
    /// Human readable name used to identify these stats when they are reported.
    pub tag: &'static str,
    /// Number of `LoaderOp::Load` that were received by the worker.
    pub load_requests: u64,
    /// Number of times that the worker invoked its batch function.
    pub dispatches: u64,
    /// The total number of keys (not necessarily unique) handed to the batch function.
    pub keys_dispatched: u64,
    /// The average number of keys per dispatch.
    pub average_batch_size: f64,
    /// The max number of keys handed to a single dispatch.
    pub max_batch_size: usize,
    /// The min number of keys handed to a single dispatch. Zero until the first dispatch.
    pub min_batch_size: usize,
}

impl DispatchStats {
    pub fn new(tag: &'static str) -> Self {
        Self { tag, ..Default::default() }
    }

    pub fn record_load_request(&mut self) {
        self.load_requests += 1;
    }

    pub fn record_dispatch(&mut self, batch_size: usize) {
        if self.dispatches == 0 || batch_size < self.min_batch_size {
            self.min_batch_size = batch_size;
        }
        if batch_size > self.max_batch_size {
            self.max_batch_size = batch_size;
        }
        self.dispatches += 1;
        self.keys_dispatched += batch_size as u64;
        self.average_batch_size = self.keys_dispatched as f64 / self.dispatches as f64;
    }
}

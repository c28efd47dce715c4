use std::sync::Arc;

/// Reasons a [`Loader::load`](crate::Loader::load) can fail.
///
/// Every request that took part in a failed dispatch observes the same error; `Batch` errors
/// share one `Arc` across all of them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The batch function returned an error for the dispatch this request was part of.
    #[error("batch function failed: {0}")]
    Batch(Arc<dyn std::error::Error + Send + Sync>),

    /// The batch function returned a different number of values than it was given keys.
    #[error("batch function returned {actual} values for {expected} keys")]
    LengthMismatch { expected: usize, actual: usize },

    /// The loader worker is no longer accepting requests.
    #[error("loader worker has stopped")]
    WorkerStopped,

    /// The request was dropped before its dispatch resolved it.
    #[error("request was canceled before its batch resolved")]
    Canceled,
}

impl LoadError {
    pub(crate) fn batch<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LoadError::Batch(Arc::new(err))
    }
}

use async_trait::async_trait;

/// A `BatchFunction` defines the method through which some `Loader` fetches batched data from
/// some resource. It receives the keys that were requested during the `Loader`'s most recent
/// scheduling turn, in request order, and some user defined context struct.
///
/// The returned values are matched to their requesters by position: `values[i]` is delivered to
/// whoever requested `keys[i]`, so the function must return exactly one value per key. Keys may
/// repeat. Returning a vector of a different length fails the whole batch with
/// [`LoadError::LengthMismatch`](crate::LoadError::LengthMismatch).
///
/// A missing key is the function's own concern. Use `V = Option<T>` (or a placeholder value) if
/// absence is not a failure. Returning `Err` fails every request in the batch with the same
/// [`LoadError::Batch`](crate::LoadError::Batch).
///
/// Multiple `BatchFunctions` (and therefore loaders) can share the same context (likely through an
/// `Arc`).
#[async_trait]
pub trait BatchFunction<K, V> {
    type Context;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load(keys: &[K], context: &Self::Context) -> Result<Vec<V>, Self::Error>;
}

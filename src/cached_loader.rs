use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::slice;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::{
    batch_function::BatchFunction, cache::Cache, config::LoaderConfig, error::LoadError,
    loader::Loader,
};

/// The remembered outcome of one key's load, shared by everyone who asks for that key.
pub type SharedLoad<V> = Shared<BoxFuture<'static, Result<V, LoadError>>>;

/// A [`Loader`] with a per-key memo in front of it.
///
/// The first `load` of a key enqueues it on the inner loader and remembers the resulting future.
/// Every later `load` of that key, whether the first one is still in flight or already resolved,
/// awaits the same future instead of adding another entry to the batch. Keys stay cached until
/// [`CachedLoader::clear`], [`CachedLoader::clear_many`] or [`CachedLoader::clear_all`] is called;
/// a load that fails is evicted so that the next request retries it.
pub struct CachedLoader<K, V, C = HashMap<K, SharedLoad<V>>>
where
    K: 'static + Debug + Send + Sync,
    V: 'static + Send + Debug,
{
    loader: Loader<K, V>,
    cache: Mutex<C>,
}

impl<K, V> CachedLoader<K, V>
where
    K: 'static + Debug + Eq + Hash + Clone + Send + Sync,
    V: 'static + Debug + Clone + Send + Sync,
{
    /// Creates a CachedLoader over a new [`Loader`] for the provided BatchFunction and Context.
    pub fn new<F, ContextT>(batch_fn: F, context: ContextT) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    {
        Self::with_cache(Loader::new(batch_fn, context), HashMap::new())
    }

    pub fn with_config<F, ContextT>(batch_fn: F, context: ContextT, config: LoaderConfig) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    {
        Self::with_cache(Loader::with_config(batch_fn, context, config), HashMap::new())
    }
}

impl<K, V, C> CachedLoader<K, V, C>
where
    K: 'static + Debug + Clone + Send + Sync,
    V: 'static + Debug + Clone + Send + Sync,
    C: Cache<K = K, V = SharedLoad<V>>,
{
    pub fn with_cache(loader: Loader<K, V>, cache: C) -> Self {
        Self { loader, cache: Mutex::new(cache) }
    }

    /// The uncached loader underneath.
    pub fn loader(&self) -> &Loader<K, V> {
        &self.loader
    }

    /// Loads a value, reusing the in-flight or resolved load of `key` if there is one.
    pub async fn load(&self, key: K) -> Result<V, LoadError> {
        let result = self.cached_or_enqueue(&key)?.await;
        if result.is_err() {
            self.evict_failed(&key);
        }
        result
    }

    /// Loads many values at once. Keys that are not cached are batched together.
    pub async fn load_many(&self, keys: Vec<K>) -> Result<Vec<V>, LoadError> {
        future::try_join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// Adds a value to the cache, replacing whatever was cached for `key`.
    pub fn prime(&self, key: K, value: V) {
        self.cache.lock().insert(key, resolved(value));
    }

    /// Adds many values to the cache at once.
    pub fn prime_many(&self, key_vals: Vec<(K, V)>) {
        self.cache.lock().insert_many(key_vals.into_iter().map(|(k, v)| (k, resolved(v))));
    }

    /// Removes a value from the cache.
    ///
    /// This key will be reloaded when it is next requested.
    pub fn clear(&self, key: K) {
        self.cache.lock().remove(slice::from_ref(&key));
    }

    /// Removes multiple values from the cache at once.
    pub fn clear_many(&self, keys: Vec<K>) {
        self.cache.lock().remove(&keys);
    }

    /// Empties the cache.
    pub fn clear_all(&self) {
        self.cache.lock().flush();
    }

    fn cached_or_enqueue(&self, key: &K) -> Result<SharedLoad<V>, LoadError> {
        let mut cache = self.cache.lock();
        if let Some(load) = cache.get(key) {
            tracing::trace!(?key, "cache hit");
            return Ok(load.clone());
        }
        let response_rx = self.loader.enqueue(key.clone())?;
        let load = async move { response_rx.await.map_err(|_| LoadError::Canceled)? }
            .boxed()
            .shared();
        cache.insert(key.clone(), load.clone());
        Ok(load)
    }

    /// Drops the cached load of `key` if it failed. A reload started after a `clear` is kept.
    fn evict_failed(&self, key: &K) {
        let mut cache = self.cache.lock();
        let failed = cache
            .get(key)
            .and_then(|cached| cached.peek())
            .map_or(false, |result| result.is_err());
        if failed {
            tracing::debug!(?key, "evicting failed load");
            cache.remove(slice::from_ref(key));
        }
    }
}

fn resolved<V>(value: V) -> SharedLoad<V>
where
    V: 'static + Clone + Send,
{
    future::ready(Ok(value)).boxed().shared()
}

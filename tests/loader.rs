use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batchload_rs::{BatchFunction, LoadError, Loader, LoaderConfig, Schedule};
use futures::{future, FutureExt};
use parking_lot::Mutex;

#[derive(Debug, PartialEq, Eq, Clone)]
struct DummyData(String);

#[derive(Debug, thiserror::Error)]
#[error("backend exploded")]
struct DummyError;

#[derive(Default)]
struct DummyContext {
    map: HashMap<i64, String>,
    latency: Duration,
    calls: Mutex<Vec<Vec<i64>>>,
}

impl DummyContext {
    fn with_entries(entries: &[(i64, &str)]) -> Arc<Self> {
        let map = entries.iter().map(|(k, v)| (*k, v.to_string())).collect();
        Arc::new(Self { map, ..Default::default() })
    }

    fn calls(&self) -> Vec<Vec<i64>> {
        self.calls.lock().clone()
    }

    async fn record(&self, keys: &[i64]) {
        self.calls.lock().push(keys.to_vec());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

struct DummyDataLoader;

#[async_trait]
impl BatchFunction<i64, Option<DummyData>> for DummyDataLoader {
    type Context = Arc<DummyContext>;
    type Error = DummyError;

    async fn load(
        keys: &[i64],
        context: &Arc<DummyContext>,
    ) -> Result<Vec<Option<DummyData>>, DummyError> {
        context.record(keys).await;
        Ok(keys.iter().map(|k| context.map.get(k).cloned().map(DummyData)).collect())
    }
}

struct FailingLoader;

#[async_trait]
impl BatchFunction<i64, DummyData> for FailingLoader {
    type Context = Arc<DummyContext>;
    type Error = DummyError;

    async fn load(
        keys: &[i64],
        context: &Arc<DummyContext>,
    ) -> Result<Vec<DummyData>, DummyError> {
        context.record(keys).await;
        Err(DummyError)
    }
}

/// Forgets the value for the last key it is given.
struct ShortLoader;

#[async_trait]
impl BatchFunction<i64, i64> for ShortLoader {
    type Context = Arc<DummyContext>;
    type Error = DummyError;

    async fn load(keys: &[i64], context: &Arc<DummyContext>) -> Result<Vec<i64>, DummyError> {
        context.record(keys).await;
        Ok(keys.iter().skip(1).copied().collect())
    }
}

fn fish() -> Arc<DummyContext> {
    DummyContext::with_entries(&[
        (42, "one fish"),
        (12, "two fish"),
        (5, "red fish"),
        (8, "blue fish"),
    ])
}

fn some(s: &str) -> Option<DummyData> {
    Some(DummyData(s.to_owned()))
}

#[tokio::test]
async fn basic_load() {
    let context = DummyContext::with_entries(&[(42, "Foo")]);

    let loader = Loader::new(DummyDataLoader, context.clone());
    assert_eq!(loader.load(42).await.unwrap(), some("Foo"));
    assert_eq!(context.calls(), vec![vec![42]]);
}

#[tokio::test]
async fn repeated_load_dispatches_each_turn() {
    let context = DummyContext::with_entries(&[(42, "Foo")]);

    let loader = Loader::new(DummyDataLoader, context.clone());
    assert_eq!(loader.load(42).await.unwrap(), some("Foo"));
    assert_eq!(loader.load(42).await.unwrap(), some("Foo"));
    assert_eq!(context.calls(), vec![vec![42], vec![42]]);
}

#[tokio::test]
async fn missing_key_is_up_to_the_batch_function() {
    let context = fish();
    let loader = Loader::new(DummyDataLoader, context.clone());
    assert_eq!(loader.load(99).await.unwrap(), None);
}

#[tokio::test]
async fn basic_load_many() {
    let context = fish();

    let loader = Loader::new(DummyDataLoader, context.clone());
    assert_eq!(
        loader.load_many(vec![5, 12, 8]).await.unwrap(),
        vec![some("red fish"), some("two fish"), some("blue fish")]
    );
    assert_eq!(context.calls(), vec![vec![5, 12, 8]]);
}

#[tokio::test]
async fn load_async() {
    let context = fish();

    let loader = Loader::new(DummyDataLoader, context.clone());

    let tuple = future::join4(
        loader.load(5),
        loader.load_many(vec![5, 42]),
        loader.load(99),
        loader.load(12),
    );

    let (a, b, c, d) = tuple.await;
    assert_eq!(a.unwrap(), some("red fish"));
    assert_eq!(b.unwrap(), vec![some("red fish"), some("one fish")]);
    assert_eq!(c.unwrap(), None);
    assert_eq!(d.unwrap(), some("two fish"));
    assert_eq!(context.calls(), vec![vec![5, 5, 42, 99, 12]]);
}

#[tokio::test]
async fn concurrent_requests_share_one_dispatch() {
    let context =
        DummyContext::with_entries(&[(1, "v1"), (2, "v2"), (3, "v3"), (4, "v4"), (5, "v5")]);
    let loader = Loader::new(DummyDataLoader, context.clone());

    let ids = vec![1, 2, 3, 4, 5];
    let results = future::join_all(ids.iter().map(|id| loader.load(*id))).await;

    for (id, result) in ids.iter().zip(results) {
        assert_eq!(result.unwrap(), Some(DummyData(format!("v{}", id))));
    }
    assert_eq!(context.calls(), vec![ids]);
}

#[tokio::test]
async fn duplicate_keys_are_not_deduplicated() {
    let context = fish();
    let loader = Loader::new(DummyDataLoader, context.clone());

    let (a, b) = future::join(loader.load(8), loader.load(8)).await;
    assert_eq!(a.unwrap(), some("blue fish"));
    assert_eq!(b.unwrap(), some("blue fish"));
    assert_eq!(context.calls(), vec![vec![8, 8]]);
}

#[tokio::test]
async fn failure_reaches_every_request_in_the_batch() {
    let context = fish();
    let loader = Loader::new(FailingLoader, context.clone());

    let results = future::join_all((1..=4).map(|id| loader.load(id))).await;

    let errors = results.into_iter().map(|r| r.unwrap_err()).collect::<Vec<_>>();
    let first = match &errors[0] {
        LoadError::Batch(e) => e.clone(),
        other => panic!("unexpected error: {:?}", other),
    };
    assert_eq!(first.to_string(), "backend exploded");
    for err in &errors {
        match err {
            LoadError::Batch(e) => assert!(Arc::ptr_eq(e, &first)),
            other => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(context.calls(), vec![vec![1, 2, 3, 4]]);
}

#[tokio::test]
async fn failed_batch_does_not_poison_the_next_turn() {
    let context = fish();
    let loader = Loader::new(FailingLoader, context.clone());

    assert!(loader.load(1).await.is_err());
    assert!(loader.load(2).await.is_err());
    assert_eq!(context.calls(), vec![vec![1], vec![2]]);
}

#[tokio::test]
async fn length_mismatch_fails_the_batch() {
    let context = fish();
    let loader = Loader::new(ShortLoader, context.clone());

    let results = future::join_all((1..=3).map(|id| loader.load(id))).await;
    for result in results {
        match result {
            Err(LoadError::LengthMismatch { expected: 3, actual: 2 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn requests_during_inflight_dispatch_start_a_new_batch() {
    let context = Arc::new(DummyContext {
        map: [(1, "one".to_owned()), (2, "two".to_owned())].into_iter().collect(),
        latency: Duration::from_millis(50),
        ..Default::default()
    });
    let loader = Loader::new(DummyDataLoader, context.clone());

    let late = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        loader.load(2).await
    };
    let (a, b) = future::join(loader.load(1), late).await;

    assert_eq!(a.unwrap(), some("one"));
    assert_eq!(b.unwrap(), some("two"));
    assert_eq!(context.calls(), vec![vec![1], vec![2]]);
}

#[tokio::test(start_paused = true)]
async fn yield_schedule_does_not_wait_for_other_tasks() {
    let context = fish();
    let loader = Arc::new(Loader::new(DummyDataLoader, context.clone()));

    let early = tokio::spawn({
        let loader = Arc::clone(&loader);
        async move { loader.load(5).await }
    });
    let late = tokio::spawn({
        let loader = Arc::clone(&loader);
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            loader.load(8).await
        }
    });

    assert_eq!(early.await.unwrap().unwrap(), some("red fish"));
    assert_eq!(late.await.unwrap().unwrap(), some("blue fish"));
    assert_eq!(context.calls(), vec![vec![5], vec![8]]);
}

#[tokio::test(start_paused = true)]
async fn delay_schedule_collects_across_tasks() {
    let context = fish();
    let config = LoaderConfig::new().schedule(Schedule::Delay(Duration::from_millis(20)));
    let loader = Arc::new(Loader::with_config(DummyDataLoader, context.clone(), config));

    let early = tokio::spawn({
        let loader = Arc::clone(&loader);
        async move { loader.load(5).await }
    });
    let late = tokio::spawn({
        let loader = Arc::clone(&loader);
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            loader.load(8).await
        }
    });

    assert_eq!(early.await.unwrap().unwrap(), some("red fish"));
    assert_eq!(late.await.unwrap().unwrap(), some("blue fish"));
    assert_eq!(context.calls(), vec![vec![5, 8]]);
}

#[tokio::test]
async fn max_batch_size_splits_a_flush_in_order() {
    let context = DummyContext::with_entries(&[(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")]);
    let config = LoaderConfig::new().max_batch_size(2);
    let loader = Loader::with_config(DummyDataLoader, context.clone(), config);

    let values = loader.load_many(vec![1, 2, 3, 4, 5]).await.unwrap();
    assert_eq!(values, vec![some("a"), some("b"), some("c"), some("d"), some("e")]);
    assert_eq!(context.calls(), vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[tokio::test]
async fn abandoned_request_does_not_disturb_the_batch() {
    let context = fish();
    let loader = Loader::new(DummyDataLoader, context.clone());

    let mut abandoned = loader.load(42).boxed();
    assert!((&mut abandoned).now_or_never().is_none());
    drop(abandoned);

    assert_eq!(loader.load(12).await.unwrap(), some("two fish"));
    assert_eq!(context.calls(), vec![vec![42, 12]]);
}

#[tokio::test]
async fn stats_count_requests_and_dispatches() {
    let context = fish();
    let loader = Loader::new(DummyDataLoader, context.clone());

    loader.load_many(vec![5, 12, 8]).await.unwrap();
    loader.load(42).await.unwrap();

    let stats = loader.stats().await.unwrap();
    assert_eq!(stats.load_requests, 4);
    assert_eq!(stats.dispatches, 2);
    assert_eq!(stats.keys_dispatched, 4);
    assert_eq!(stats.max_batch_size, 3);
    assert_eq!(stats.min_batch_size, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_is_one_batch_on_a_multi_thread_runtime() {
    for _ in 0..100 {
        let context = DummyContext::with_entries(&[]);
        let loader = Loader::new(DummyDataLoader, context.clone());

        let results = future::join_all((0..20).map(|id| loader.load(id))).await;
        assert!(results.iter().all(|r| matches!(r, Ok(None))));
        assert_eq!(context.calls(), vec![(0..20).collect::<Vec<_>>()]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn load_many_is_one_batch_on_a_multi_thread_runtime() {
    let context = fish();
    let loader = Loader::new(DummyDataLoader, context.clone());

    for _ in 0..50 {
        let values = loader.load_many(vec![42, 12, 5, 8, 42]).await.unwrap();
        assert_eq!(values[4], some("one fish"));
    }
    let calls = context.calls();
    assert_eq!(calls.len(), 50);
    assert!(calls.iter().all(|keys| keys == &[42, 12, 5, 8, 42]));
}

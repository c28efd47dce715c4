//! An in-memory stand-in for a slow database, with batch functions over it.
//!
//! Every query waits a fixed latency before answering and is recorded in a query log, which makes
//! the difference between point lookups and batched lookups easy to observe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use parking_lot::Mutex;

use crate::{batch_function::BatchFunction, error::LoadError, loader::Loader};

pub const DEFAULT_LATENCY: Duration = Duration::from_millis(200);

pub fn user_id(n: u32) -> String {
    format!("user:{}", n)
}

pub fn post_id(n: u32) -> String {
    format!("post:{}", n)
}

pub fn stats_id(n: u32) -> String {
    format!("stats:{}", n)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub author_id: String,
    pub stats_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub id: String,
    pub view_count: u64,
}

/// One round trip to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    UserById(String),
    UsersByIds(Vec<String>),
    Posts,
    StatsById(String),
    StatsByIds(Vec<String>),
    FunFact(u64),
    FunFacts(Vec<u64>),
}

impl Query {
    pub fn is_bulk(&self) -> bool {
        matches!(self, Query::UsersByIds(_) | Query::StatsByIds(_) | Query::FunFacts(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store is unavailable")]
    Unavailable,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Three users, each with five posts, each post with its own stats row.
#[derive(Debug)]
pub struct MockStore {
    users: Vec<User>,
    posts: Vec<Post>,
    stats: Vec<Stats>,
    latency: Duration,
    offline: AtomicBool,
    queries: Mutex<Vec<Query>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self::with_latency(DEFAULT_LATENCY)
    }

    pub fn with_latency(latency: Duration) -> Self {
        let names = ["Alice", "Bob", "Charlie"];
        let users = (1..)
            .zip(names.iter())
            .map(|(n, name)| User { id: user_id(n), name: name.to_string() })
            .collect::<Vec<_>>();
        let posts = (1..=15)
            .map(|n| {
                let author = (n - 1) / 5;
                Post {
                    id: post_id(n),
                    title: format!("Post {} by {}", (n - 1) % 5 + 1, names[author as usize]),
                    author_id: user_id(author + 1),
                    stats_id: stats_id(n),
                }
            })
            .collect::<Vec<_>>();
        let stats = (1..=15)
            .map(|n| Stats { id: stats_id(n), view_count: u64::from(n) })
            .collect::<Vec<_>>();

        Self {
            users,
            posts,
            stats,
            latency,
            offline: AtomicBool::new(false),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// While offline, every query fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every query issued so far, in order.
    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn reset_queries(&self) {
        self.queries.lock().clear();
    }

    async fn round_trip(&self, query: Query) -> Result<()> {
        tracing::debug!(?query, "store query");
        self.queries.lock().push(query);
        tokio::time::sleep(self.latency).await;
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    pub async fn user_by_id(&self, id: &str) -> Result<Option<User>> {
        self.round_trip(Query::UserById(id.to_owned())).await?;
        Ok(self.find_user(id))
    }

    pub async fn users_by_ids(&self, ids: &[String]) -> Result<Vec<Option<User>>> {
        self.round_trip(Query::UsersByIds(ids.to_vec())).await?;
        Ok(ids.iter().map(|id| self.find_user(id)).collect())
    }

    pub async fn posts(&self) -> Result<Vec<Post>> {
        self.round_trip(Query::Posts).await?;
        Ok(self.posts.clone())
    }

    pub async fn stats_by_id(&self, id: &str) -> Result<Option<Stats>> {
        self.round_trip(Query::StatsById(id.to_owned())).await?;
        Ok(self.find_stats(id))
    }

    pub async fn stats_by_ids(&self, ids: &[String]) -> Result<Vec<Option<Stats>>> {
        self.round_trip(Query::StatsByIds(ids.to_vec())).await?;
        Ok(ids.iter().map(|id| self.find_stats(id)).collect())
    }

    pub async fn fun_fact(&self, view_count: u64) -> Result<String> {
        self.round_trip(Query::FunFact(view_count)).await?;
        Ok(fun_fact_text(view_count))
    }

    pub async fn fun_facts(&self, view_counts: &[u64]) -> Result<Vec<String>> {
        self.round_trip(Query::FunFacts(view_counts.to_vec())).await?;
        Ok(view_counts.iter().copied().map(fun_fact_text).collect())
    }

    fn find_user(&self, id: &str) -> Option<User> {
        self.users.iter().find(|u| u.id == id).cloned()
    }

    fn find_stats(&self, id: &str) -> Option<Stats> {
        self.stats.iter().find(|s| s.id == id).cloned()
    }
}

fn fun_fact_text(view_count: u64) -> String {
    format!("Fun fact for view count = {}", view_count)
}

pub struct UserBatch;

#[async_trait]
impl BatchFunction<String, Option<User>> for UserBatch {
    type Context = Arc<MockStore>;
    type Error = StoreError;

    async fn load(keys: &[String], store: &Arc<MockStore>) -> Result<Vec<Option<User>>> {
        store.users_by_ids(keys).await
    }
}

pub struct StatsBatch;

#[async_trait]
impl BatchFunction<String, Option<Stats>> for StatsBatch {
    type Context = Arc<MockStore>;
    type Error = StoreError;

    async fn load(keys: &[String], store: &Arc<MockStore>) -> Result<Vec<Option<Stats>>> {
        store.stats_by_ids(keys).await
    }
}

pub struct FunFactBatch;

#[async_trait]
impl BatchFunction<u64, String> for FunFactBatch {
    type Context = Arc<MockStore>;
    type Error = StoreError;

    async fn load(keys: &[u64], store: &Arc<MockStore>) -> Result<Vec<String>> {
        store.fun_facts(keys).await
    }
}

/// Everything shown for one post: who wrote it, how often it was viewed, and a fact about that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
    pub title: String,
    pub author: Option<String>,
    pub view_count: u64,
    pub fun_fact: String,
}

/// Summarizes every post with one point lookup per field per post.
pub async fn summaries_naive(store: &MockStore) -> Result<Vec<PostSummary>> {
    let posts = store.posts().await?;
    future::try_join_all(posts.into_iter().map(|post| async move {
        let (author, stats) =
            future::try_join(store.user_by_id(&post.author_id), store.stats_by_id(&post.stats_id))
                .await?;
        let view_count = stats.map_or(0, |s| s.view_count);
        let fun_fact = store.fun_fact(view_count).await?;
        Ok::<_, StoreError>(PostSummary {
            title: post.title,
            author: author.map(|u| u.name),
            view_count,
            fun_fact,
        })
    }))
    .await
}

/// The loaders needed to summarize posts without N+1 queries.
pub struct SummaryLoaders {
    pub users: Loader<String, Option<User>>,
    pub stats: Loader<String, Option<Stats>>,
    pub fun_facts: Loader<u64, String>,
}

impl SummaryLoaders {
    pub fn new(store: &Arc<MockStore>) -> Self {
        Self {
            users: Loader::new(UserBatch, Arc::clone(store)),
            stats: Loader::new(StatsBatch, Arc::clone(store)),
            fun_facts: Loader::new(FunFactBatch, Arc::clone(store)),
        }
    }
}

/// Why a batched summary could not be built.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    /// Listing the posts failed before any loader was involved.
    #[error("could not list posts: {0}")]
    Posts(#[from] StoreError),
    /// A per-field loader failed.
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Summarizes every post through per-field loaders, so each field costs one bulk query.
pub async fn summaries_batched(
    store: &MockStore,
    loaders: &SummaryLoaders,
) -> std::result::Result<Vec<PostSummary>, SummaryError> {
    let posts = store.posts().await?;
    future::try_join_all(posts.into_iter().map(|post| async move {
        let (author, stats) = future::try_join(
            loaders.users.load(post.author_id.clone()),
            loaders.stats.load(post.stats_id.clone()),
        )
        .await?;
        let view_count = stats.map_or(0, |s| s.view_count);
        let fun_fact = loaders.fun_facts.load(view_count).await?;
        Ok::<_, SummaryError>(PostSummary {
            title: post.title,
            author: author.map(|u| u.name),
            view_count,
            fun_fact,
        })
    }))
    .await
}

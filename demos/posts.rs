//! Summarizes 15 posts twice against a slow store: once with a point lookup per field, once
//! through loaders. Run with `RUST_LOG=batchload_rs=debug` to watch the batches form.

use std::sync::Arc;
use std::time::Instant;

use batchload_rs::mock_store::{summaries_batched, summaries_naive, MockStore, SummaryLoaders};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let store = Arc::new(MockStore::new());

    let started = Instant::now();
    let summaries = summaries_naive(&store).await?;
    tracing::info!(
        posts = summaries.len(),
        queries = store.query_count(),
        elapsed = ?started.elapsed(),
        "naive"
    );

    store.reset_queries();
    let loaders = SummaryLoaders::new(&store);
    let started = Instant::now();
    let summaries = summaries_batched(&store, &loaders).await?;
    tracing::info!(
        posts = summaries.len(),
        queries = store.query_count(),
        elapsed = ?started.elapsed(),
        "batched"
    );

    for summary in summaries {
        println!(
            "{} by {} ({} views): {}",
            summary.title,
            summary.author.as_deref().unwrap_or("unknown"),
            summary.view_count,
            summary.fun_fact
        );
    }
    Ok(())
}

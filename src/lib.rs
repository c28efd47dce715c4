mod batch_function;
mod cache;
mod cached_loader;
mod config;
mod error;
mod loader;
mod loader_op;
mod loader_worker;
pub mod mock_store;
mod worker_stats;

pub use batch_function::BatchFunction;
pub use cache::Cache;
pub use cached_loader::{CachedLoader, SharedLoad};
pub use config::{LoaderConfig, Schedule};
pub use error::LoadError;
pub use loader::Loader;
pub use worker_stats::DispatchStats;

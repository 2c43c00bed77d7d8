//! Key-value store behind the in-process caches, rate limiters, and
//! ephemeral presence/typing state.
//!
//! Single-instance deployments run on [`InMemoryStore`]; a multi-instance
//! deployment must select [`RedisStore`] (set `REDIS_URL`) or rate limits
//! and presence diverge between instances.

pub mod in_memory;
pub mod redis_store;

pub use in_memory::InMemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<CacheError> for crate::error::AppError {
    fn from(err: CacheError) -> Self {
        crate::error::AppError::Cache(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

pub type SharedStore = Arc<dyn KeyValueStore>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Atomically increment a counter. The TTL is applied only when the
    /// increment creates the counter, which is what gives fixed-window
    /// semantics to the rate limiters built on top.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64>;

    /// All live (non-expired) entries whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<(String, String)>>;
}

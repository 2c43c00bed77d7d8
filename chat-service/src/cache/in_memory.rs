//! Process-local store for single-instance deployment.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{CacheResult, KeyValueStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict dead entries in the background. Reads already ignore expired
    /// entries; this keeps the map from growing without bound.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                inner.write().await.retain(|_, e| !e.is_expired(now));
            }
        })
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(key)
            .filter(|e| !e.is_expired(Instant::now()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.inner.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64> {
        let mut guard = self.inner.write().await;
        let now = Instant::now();

        let live = guard.get(key).filter(|e| !e.is_expired(now));
        let (count, expires_at) = match live {
            Some(entry) => (
                entry.value.parse::<i64>().unwrap_or(0) + 1,
                entry.expires_at,
            ),
            // Counter is new (or its window lapsed): TTL starts here.
            None => (1, ttl.map(|t| now + t)),
        };

        guard.insert(
            key.to_string(),
            Entry {
                value: count.to_string(),
                expires_at,
            },
        );
        Ok(count)
    }

    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<(String, String)>> {
        let guard = self.inner.read().await;
        let now = Instant::now();
        Ok(guard
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }
}

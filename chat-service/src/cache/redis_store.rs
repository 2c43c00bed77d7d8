//! Redis-backed store for multi-instance deployment.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::{CacheError, CacheResult, KeyValueStore};

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn backend<E: std::fmt::Display>(e: E) -> CacheError {
    CacheError::Backend(e.to_string())
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn();
        conn.get(key).await.map_err(backend)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(backend),
            None => conn.set::<_, _, ()>(key, value).await.map_err(backend),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key).await.map_err(backend)
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64> {
        let mut conn = self.conn();
        let count: i64 = conn.incr(key, 1).await.map_err(backend)?;
        if count == 1 {
            if let Some(ttl) = ttl {
                conn.expire::<_, ()>(key, ttl.as_secs() as i64)
                    .await
                    .map_err(backend)?;
            }
        }
        Ok(count)
    }

    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<(String, String)>> {
        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(backend)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }
}

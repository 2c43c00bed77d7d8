//! Fixed-window per-(user, operation) rate limiting over the shared store.

use std::time::Duration;
use uuid::Uuid;

use crate::cache::SharedStore;
use crate::config::RateLimitConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SendMessage,
    TypingUpdate,
    Reaction,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::SendMessage => "send",
            Operation::TypingUpdate => "typing",
            Operation::Reaction => "reaction",
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    config: RateLimitConfig,
}

fn window_key(user_id: Uuid, group_id: Uuid, op: Operation) -> String {
    format!("ratelimit:{}:{}:{}", op.as_str(), user_id, group_id)
}

impl RateLimiter {
    pub fn new(store: SharedStore, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn limit_for(&self, op: Operation) -> u32 {
        match op {
            Operation::SendMessage => self.config.max_sends,
            Operation::TypingUpdate => self.config.max_typing_updates,
            Operation::Reaction => self.config.max_reactions,
        }
    }

    /// Count one call against the caller's window; `RateLimited` once the
    /// window's budget is spent. The counter's TTL starts at the first call
    /// of the window, so the limit resets when the window rolls over.
    pub async fn check(&self, user_id: Uuid, group_id: Uuid, op: Operation) -> AppResult<()> {
        let window = Duration::from_secs(self.config.window_secs);
        let count = self
            .store
            .incr(&window_key(user_id, group_id, op), Some(window))
            .await?;

        if count > self.limit_for(op) as i64 {
            return Err(AppError::RateLimited {
                retry_after_secs: self.config.window_secs,
            });
        }
        Ok(())
    }
}

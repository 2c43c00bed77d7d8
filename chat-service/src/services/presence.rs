//! Ephemeral per-(group, user) state: typing indicators and presence.
//!
//! Both live in the key-value store with TTLs so they self-expire when a
//! client vanishes without saying goodbye. Presence is never inferred: a
//! user is `offline` until an explicit update says otherwise.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::SharedStore;
use crate::error::AppResult;
use crate::models::{PresenceState, PresenceStatus, TypingState};
use crate::services::broadcaster::EventPublisher;
use crate::websocket::events::ChatEvent;

fn typing_key(group_id: Uuid, user_id: Uuid) -> String {
    format!("typing:{group_id}:{user_id}")
}

fn presence_key(group_id: Uuid, user_id: Uuid) -> String {
    format!("presence:{group_id}:{user_id}")
}

#[derive(Clone)]
pub struct TypingTracker {
    store: SharedStore,
    publisher: EventPublisher,
    ttl: Duration,
}

impl TypingTracker {
    pub fn new(store: SharedStore, publisher: EventPublisher, ttl_secs: u64) -> Self {
        Self {
            store,
            publisher,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Record or clear a typing indicator and tell the rest of the group.
    /// The entry self-expires even if the explicit stop never arrives.
    pub async fn set_typing(&self, group_id: Uuid, user_id: Uuid, is_typing: bool) -> AppResult<()> {
        let key = typing_key(group_id, user_id);
        let event = if is_typing {
            self.store
                .set(&key, &Utc::now().to_rfc3339(), Some(self.ttl))
                .await?;
            ChatEvent::TypingStarted { group_id, user_id }
        } else {
            self.store.delete(&key).await?;
            ChatEvent::TypingStopped { group_id, user_id }
        };
        self.publisher.publish(event);
        Ok(())
    }

    /// Users currently typing in the group.
    pub async fn snapshot(&self, group_id: Uuid) -> AppResult<Vec<TypingState>> {
        let prefix = format!("typing:{group_id}:");
        let entries = self.store.scan_prefix(&prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, started)| {
                let user_id = Uuid::parse_str(key.strip_prefix(&prefix)?).ok()?;
                Some(TypingState {
                    group_id,
                    user_id,
                    started_at: started.parse().unwrap_or_else(|_| Utc::now()),
                })
            })
            .collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredPresence {
    status: PresenceStatus,
    device_type: Option<String>,
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    db: PgPool,
    store: SharedStore,
    publisher: EventPublisher,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(db: PgPool, store: SharedStore, publisher: EventPublisher, ttl_secs: u64) -> Self {
        Self {
            db,
            store,
            publisher,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Record an explicit presence report: TTL'd live entry, durable row,
    /// and a broadcast to the rest of the group.
    pub async fn update_presence(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        status: PresenceStatus,
        device_type: Option<String>,
    ) -> AppResult<()> {
        let stored = StoredPresence {
            status,
            device_type: device_type.clone(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&stored)
            .map_err(|e| crate::error::AppError::Validation(e.to_string()))?;

        match status {
            // An offline report removes the live entry instead of letting a
            // stale "online" linger until TTL.
            PresenceStatus::Offline => {
                self.store.delete(&presence_key(group_id, user_id)).await?;
            }
            _ => {
                self.store
                    .set(&presence_key(group_id, user_id), &json, Some(self.ttl))
                    .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO presence (group_id, user_id, status, device_type, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (group_id, user_id) DO UPDATE
                SET status = EXCLUDED.status,
                    device_type = EXCLUDED.device_type,
                    updated_at = NOW()
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(status.as_str())
        .bind(&device_type)
        .execute(&self.db)
        .await?;

        self.publisher.publish(ChatEvent::PresenceChanged {
            group_id,
            user_id,
            status: status.as_str().to_string(),
            device_type,
        });
        Ok(())
    }

    /// Live (unexpired) view of one member. Expired or absent → offline.
    pub async fn live_status(&self, group_id: Uuid, user_id: Uuid) -> AppResult<PresenceStatus> {
        let entry = self.store.get(&presence_key(group_id, user_id)).await?;
        Ok(entry
            .and_then(|json| serde_json::from_str::<StoredPresence>(&json).ok())
            .map(|p| p.status)
            .unwrap_or(PresenceStatus::Offline))
    }

    /// Live presence of every member with a fresh entry.
    pub async fn snapshot(&self, group_id: Uuid) -> AppResult<Vec<PresenceState>> {
        let prefix = format!("presence:{group_id}:");
        let entries = self.store.scan_prefix(&prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, json)| {
                let user_id = Uuid::parse_str(key.strip_prefix(&prefix)?).ok()?;
                let stored: StoredPresence = serde_json::from_str(&json).ok()?;
                Some(PresenceState {
                    group_id,
                    user_id,
                    status: stored.status,
                    device_type: stored.device_type,
                    updated_at: stored.updated_at,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryStore;
    use std::sync::Arc;

    fn tracker() -> (TypingTracker, tokio::sync::mpsc::UnboundedReceiver<ChatEvent>) {
        let (publisher, rx) = EventPublisher::channel();
        (
            TypingTracker::new(Arc::new(InMemoryStore::new()), publisher, 10),
            rx,
        )
    }

    #[tokio::test]
    async fn typing_set_and_snapshot() {
        let (typing, mut rx) = tracker();
        let group = Uuid::new_v4();
        let user = Uuid::new_v4();

        typing.set_typing(group, user, true).await.unwrap();
        let snap = typing.snapshot(group).await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].user_id, user);
        assert!(matches!(
            rx.recv().await,
            Some(ChatEvent::TypingStarted { .. })
        ));

        typing.set_typing(group, user, false).await.unwrap();
        assert!(typing.snapshot(group).await.unwrap().is_empty());
        assert!(matches!(
            rx.recv().await,
            Some(ChatEvent::TypingStopped { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn typing_entries_self_expire() {
        let (typing, _rx) = tracker();
        let group = Uuid::new_v4();

        typing
            .set_typing(group, Uuid::new_v4(), true)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(typing.snapshot(group).await.unwrap().is_empty());
    }
}

//! Out-of-chat notification sink (invites, votes, insights).
//!
//! Delivery is best-effort over the dedicated notification channel; there
//! is no durability backstop for these events, and message content never
//! flows through here.

use async_trait::async_trait;
use axum::extract::ws::Message;
use std::sync::Arc;
use uuid::Uuid;

use crate::websocket::ConnectionRegistry;

#[async_trait]
pub trait EventNotifier: Send + Sync {
    /// Push a `{type, payload}` frame to the user's notification session,
    /// if they have one. Misses are silent.
    async fn notify(&self, user_id: Uuid, kind: &str, payload: serde_json::Value);
}

pub type SharedNotifier = Arc<dyn EventNotifier>;

/// Production sink backed by the notification-channel registry.
pub struct ChannelNotifier {
    registry: ConnectionRegistry,
}

impl ChannelNotifier {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EventNotifier for ChannelNotifier {
    async fn notify(&self, user_id: Uuid, kind: &str, payload: serde_json::Value) {
        let frame = serde_json::json!({
            "type": kind,
            "payload": payload,
        })
        .to_string();

        if !self.registry.send_to_user(user_id, Message::Text(frame)).await {
            tracing::debug!(%user_id, kind, "notification dropped; no live session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_reaches_connected_user() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let mut rx = registry.register(user, Uuid::new_v4()).await;

        let notifier = ChannelNotifier::new(registry);
        notifier
            .notify(user, "group.invite", serde_json::json!({"group_id": "g"}))
            .await;

        let Some(Message::Text(frame)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "group.invite");
        assert_eq!(value["payload"]["group_id"], "g");
    }

    #[tokio::test]
    async fn notify_to_offline_user_is_silent() {
        let notifier = ChannelNotifier::new(ConnectionRegistry::new());
        notifier
            .notify(Uuid::new_v4(), "vote.started", serde_json::json!({}))
            .await;
    }
}

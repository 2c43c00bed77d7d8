use axum::extract::ws::Message;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod handlers;
pub mod message_types;
pub mod notify;

struct Connection {
    session_id: Uuid,
    tx: UnboundedSender<Message>,
}

/// Live real-time sessions, one per user. Registering a new connection for
/// an already-connected user closes the prior socket.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
    // user -> groups the session has joined
    subscriptions: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the user's live session and return the outbound receiver
    /// its socket loop drains. Any previous session is told to close.
    pub async fn register(&self, user_id: Uuid, session_id: Uuid) -> UnboundedReceiver<Message> {
        let (tx, rx) = unbounded_channel();
        let prior = self
            .connections
            .write()
            .await
            .insert(user_id, Connection { session_id, tx });
        if let Some(prior) = prior {
            let _ = prior.tx.send(Message::Close(None));
        }
        rx
    }

    /// Remove the user's connection, but only if it is still the session
    /// that asked — a reconnect may already have replaced it. Returns
    /// whether this call actually took the user offline.
    pub async fn unregister(&self, user_id: Uuid, session_id: Uuid) -> bool {
        let mut guard = self.connections.write().await;
        if guard
            .get(&user_id)
            .is_some_and(|c| c.session_id == session_id)
        {
            guard.remove(&user_id);
            drop(guard);
            self.subscriptions.write().await.remove(&user_id);
            true
        } else {
            false
        }
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    /// Push a message to the user's live session. `false` when the user has
    /// no session or the socket has gone away.
    pub async fn send_to_user(&self, user_id: Uuid, msg: Message) -> bool {
        let guard = self.connections.read().await;
        match guard.get(&user_id) {
            Some(conn) => conn.tx.send(msg).is_ok(),
            None => false,
        }
    }

    pub async fn subscribe(&self, user_id: Uuid, group_id: Uuid) {
        self.subscriptions
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(group_id);
    }

    pub async fn unsubscribe(&self, user_id: Uuid, group_id: Uuid) {
        if let Some(groups) = self.subscriptions.write().await.get_mut(&user_id) {
            groups.remove(&group_id);
        }
    }

    /// Groups the user's session has joined; used by disconnect cleanup to
    /// downgrade presence everywhere the user was visible.
    pub async fn subscriptions_of(&self, user_id: Uuid) -> Vec<Uuid> {
        self.subscriptions
            .read()
            .await
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_reaches_registered_user() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let mut rx = registry.register(user, Uuid::new_v4()).await;

        assert!(registry.send_to_user(user, Message::Text("hi".into())).await);
        assert!(matches!(rx.recv().await, Some(Message::Text(t)) if t == "hi"));
    }

    #[tokio::test]
    async fn second_registration_closes_first_session() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let mut first = registry.register(user, Uuid::new_v4()).await;
        let mut second = registry.register(user, Uuid::new_v4()).await;

        // Old session receives a close frame.
        assert!(matches!(first.recv().await, Some(Message::Close(_))));

        registry
            .send_to_user(user, Message::Text("fresh".into()))
            .await;
        assert!(matches!(second.recv().await, Some(Message::Text(t)) if t == "fresh"));
    }

    #[tokio::test]
    async fn stale_unregister_keeps_new_session() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let old_session = Uuid::new_v4();
        let _old_rx = registry.register(user, old_session).await;
        let _new_rx = registry.register(user, Uuid::new_v4()).await;

        // The old socket's cleanup must not tear down the replacement.
        assert!(!registry.unregister(user, old_session).await);
        assert!(registry.is_connected(user).await);
    }

    #[tokio::test]
    async fn send_to_unknown_user_reports_offline() {
        let registry = ConnectionRegistry::new();
        assert!(
            !registry
                .send_to_user(Uuid::new_v4(), Message::Text("x".into()))
                .await
        );
    }
}

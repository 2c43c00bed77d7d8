use crate::{
    auth::SharedVerifier,
    services::{
        key_vault::KeyVault, membership::SharedMembership, message_store::MessageStore,
        notifications::SharedNotifier, presence::PresenceTracker, presence::TypingTracker,
        rate_limit::RateLimiter, sweeper::DeliverySweeper,
    },
    websocket::ConnectionRegistry,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    /// Separate registry for the out-of-chat notification channel.
    pub notify_registry: ConnectionRegistry,
    pub verifier: SharedVerifier,
    pub membership: SharedMembership,
    pub key_vault: Arc<KeyVault>,
    pub messages: Arc<MessageStore>,
    pub presence: PresenceTracker,
    pub typing: TypingTracker,
    pub rate_limiter: RateLimiter,
    pub sweeper: DeliverySweeper,
    /// Sink the invite/vote/insight flows push through; nothing in this
    /// crate originates notifications.
    pub notifier: SharedNotifier,
}

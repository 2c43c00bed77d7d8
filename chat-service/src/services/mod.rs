pub mod broadcaster;
pub mod content;
pub mod delivery_queue;
pub mod key_vault;
pub mod membership;
pub mod message_store;
pub mod notifications;
pub mod presence;
pub mod rate_limit;
pub mod sweeper;

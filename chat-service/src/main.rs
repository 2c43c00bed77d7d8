use std::sync::Arc;
use std::time::Duration;

use chat_service::{
    auth::JwtVerifier,
    cache::{InMemoryStore, RedisStore, SharedStore},
    config, db, error, logging,
    services::{
        broadcaster::{DeliveryBroadcaster, EventPublisher},
        delivery_queue::OfflineDeliveryQueue,
        key_vault::KeyVault,
        membership::SqlMembershipDirectory,
        message_store::{MessageLimits, MessageStore},
        notifications::ChannelNotifier,
        presence::{PresenceTracker, TypingTracker},
        rate_limit::RateLimiter,
        sweeper::DeliverySweeper,
    },
    state::AppState,
    websocket::ConnectionRegistry,
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const STORE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    // Schema must be in sync before anything touches it.
    db::MIGRATOR
        .run(&db)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    // Shared store: Redis when configured (multi-instance), otherwise a
    // process-local map with its own expiry sweep.
    let store: SharedStore = match cfg.redis_url.as_deref() {
        Some(url) => {
            let redis = RedisStore::connect(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;
            tracing::info!("using redis-backed shared store");
            Arc::new(redis)
        }
        None => {
            let memory = InMemoryStore::new();
            memory.spawn_sweeper(STORE_SWEEP_INTERVAL);
            tracing::info!("using in-memory store (single instance)");
            Arc::new(memory)
        }
    };

    let registry = ConnectionRegistry::new();
    let notify_registry = ConnectionRegistry::new();
    let verifier = Arc::new(JwtVerifier::new(&cfg.jwt_secret, Arc::clone(&store)));
    let membership = Arc::new(SqlMembershipDirectory::new(db.clone()));

    let (publisher, event_rx) = EventPublisher::channel();

    let presence = PresenceTracker::new(
        db.clone(),
        Arc::clone(&store),
        publisher.clone(),
        cfg.presence_ttl_secs,
    );
    let typing = TypingTracker::new(
        Arc::clone(&store),
        publisher.clone(),
        cfg.typing_ttl_secs,
    );

    let queue = OfflineDeliveryQueue::new(
        db.clone(),
        cfg.delivery_expiry_days,
        cfg.delivery_max_attempts,
    );

    DeliveryBroadcaster::new(
        registry.clone(),
        membership.clone(),
        presence.clone(),
        queue.clone(),
    )
    .spawn(event_rx);

    let sweeper = DeliverySweeper::new(
        db.clone(),
        queue.clone(),
        registry.clone(),
        cfg.retention_days,
    );
    sweeper.clone().spawn(SWEEP_INTERVAL);

    let key_vault = Arc::new(KeyVault::new(
        db.clone(),
        membership.clone(),
        cfg.master_key,
    ));
    let rate_limiter = RateLimiter::new(Arc::clone(&store), cfg.rate_limits.clone());

    let messages = Arc::new(MessageStore::new(
        db.clone(),
        Arc::clone(&key_vault),
        membership.clone(),
        rate_limiter.clone(),
        Arc::clone(&store),
        publisher.clone(),
        MessageLimits {
            max_content_len: cfg.max_content_len,
            max_attachments: cfg.max_attachments,
            unread_cache_ttl: Duration::from_secs(cfg.unread_cache_ttl_secs),
        },
    ));

    let notifier = Arc::new(ChannelNotifier::new(notify_registry.clone()));

    let state = AppState {
        registry,
        notify_registry,
        verifier,
        membership,
        key_vault,
        messages,
        presence,
        typing,
        rate_limiter,
        sweeper,
        notifier,
    };

    let router = chat_service::routes::build_router(state.clone()).with_state(state);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting chat-service");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}

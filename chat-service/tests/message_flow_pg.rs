//! MessageStore / delivery integration tests against a real Postgres.
//!
//! Run with: DATABASE_URL=postgres://... cargo test --test message_flow_pg -- --ignored

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use chat_service::cache::InMemoryStore;
use chat_service::config::RateLimitConfig;
use chat_service::error::AppError;
use chat_service::models::DeliveryStatus;
use chat_service::services::broadcaster::{DeliveryBroadcaster, EventPublisher};
use chat_service::services::delivery_queue::OfflineDeliveryQueue;
use chat_service::services::key_vault::KeyVault;
use chat_service::services::membership::SqlMembershipDirectory;
use chat_service::services::message_store::{
    GetMessagesOptions, MessageLimits, MessageStore, SendMessageInput, DECRYPT_PLACEHOLDER,
};
use chat_service::services::presence::PresenceTracker;
use chat_service::services::rate_limit::RateLimiter;
use chat_service::services::sweeper::DeliverySweeper;
use chat_service::websocket::events::ChatEvent;
use chat_service::websocket::ConnectionRegistry;

const TEST_MASTER_KEY: [u8; 32] = [7u8; 32];

struct TestBackend {
    pool: PgPool,
    vault: Arc<KeyVault>,
    store: Arc<MessageStore>,
    // Keep the receiver alive so publishes do not log as dropped.
    _events: tokio::sync::mpsc::UnboundedReceiver<ChatEvent>,
}

async fn bootstrap(max_sends: u32) -> TestBackend {
    let db_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL env var required for message tests");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await
        .expect("failed to connect to DATABASE_URL");
    chat_service::db::MIGRATOR
        .run(&pool)
        .await
        .expect("migrations");

    let membership = Arc::new(SqlMembershipDirectory::new(pool.clone()));
    let vault = Arc::new(KeyVault::new(
        pool.clone(),
        membership.clone(),
        TEST_MASTER_KEY,
    ));
    let cache = Arc::new(InMemoryStore::new());
    let (publisher, events) = EventPublisher::channel();
    let limiter = RateLimiter::new(cache.clone(), RateLimitConfig {
        window_secs: 60,
        max_sends,
        max_typing_updates: 100,
        max_reactions: 100,
    });

    let store = Arc::new(MessageStore::new(
        pool.clone(),
        vault.clone(),
        membership,
        limiter,
        cache,
        publisher,
        MessageLimits {
            max_content_len: 8_000,
            max_attachments: 10,
            unread_cache_ttl: Duration::from_secs(30),
        },
    ));

    TestBackend {
        pool,
        vault,
        store,
        _events: events,
    }
}

async fn seed_user(pool: &PgPool, username: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, username) VALUES ($1, $2)")
        .bind(id)
        .bind(format!("{username}-{id}"))
        .execute(pool)
        .await
        .expect("seed user");
    id
}

async fn seed_group(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO groups (id, name) VALUES ($1, 'test group')")
        .bind(id)
        .execute(pool)
        .await
        .expect("seed group");
    id
}

async fn seed_member(pool: &PgPool, group_id: Uuid, user_id: Uuid, role: &str) {
    sqlx::query("INSERT INTO group_members (group_id, user_id, role) VALUES ($1, $2, $3)")
        .bind(group_id)
        .bind(user_id)
        .bind(role)
        .execute(pool)
        .await
        .expect("seed member");
}

async fn grant_key(backend: &TestBackend, group: Uuid, user: Uuid) {
    let key = backend.vault.active_key(group).await.unwrap();
    backend
        .vault
        .distribute_key_to_member(group, user, key.key_id, None)
        .await
        .unwrap();
}

fn send_input(group: Uuid, sender: Uuid, content: &str) -> SendMessageInput {
    SendMessageInput {
        group_id: group,
        sender_id: sender,
        content: content.to_string(),
        content_type: None,
        parent_message_id: None,
        client_dedupe_id: None,
        attachments: Vec::new(),
    }
}

#[tokio::test]
#[ignore]
async fn pagination_is_chronological_with_no_overlap_or_gap() {
    let backend = bootstrap(100).await;
    let group = seed_group(&backend.pool).await;
    let alice = seed_user(&backend.pool, "alice").await;
    seed_member(&backend.pool, group, alice, "owner").await;
    grant_key(&backend, group, alice).await;

    let mut sent = Vec::new();
    for i in 1..=5 {
        let view = backend
            .store
            .send_message(send_input(group, alice, &format!("message {i}")))
            .await
            .unwrap();
        sent.push(view);
    }

    // First page: the 2 newest, oldest-first within the page.
    let page1 = backend
        .store
        .get_messages(
            group,
            alice,
            GetMessagesOptions {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page1.messages.len(), 2);
    assert!(page1.has_more);
    assert_eq!(page1.messages[0].content, "message 4");
    assert_eq!(page1.messages[1].content, "message 5");

    let page2 = backend
        .store
        .get_messages(
            group,
            alice,
            GetMessagesOptions {
                limit: Some(2),
                before: page1.next_cursor,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page2.messages[0].content, "message 2");
    assert_eq!(page2.messages[1].content, "message 3");
    assert!(page2.has_more);

    let page3 = backend
        .store
        .get_messages(
            group,
            alice,
            GetMessagesOptions {
                limit: Some(2),
                before: page2.next_cursor,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page3.messages.len(), 1);
    assert_eq!(page3.messages[0].content, "message 1");
    assert!(!page3.has_more);
    assert!(page3.next_cursor.is_none());

    // Sequence numbers are strictly increasing per group.
    let seqs: Vec<i64> = sent.iter().map(|m| m.sequence_number).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
#[ignore]
async fn reaction_and_unread_scenario() {
    let backend = bootstrap(100).await;
    let group = seed_group(&backend.pool).await;
    let a = seed_user(&backend.pool, "owner-a").await;
    let b = seed_user(&backend.pool, "member-b").await;
    seed_member(&backend.pool, group, a, "owner").await;
    seed_member(&backend.pool, group, b, "member").await;
    grant_key(&backend, group, a).await;
    grant_key(&backend, group, b).await;

    let mut ids = Vec::new();
    for i in 1..=3 {
        let view = backend
            .store
            .send_message(send_input(group, a, &format!("msg {i}")))
            .await
            .unwrap();
        ids.push(view.id);
    }

    // B reacts 👍 to message 2 — twice; the second is a no-op.
    backend.store.add_reaction(ids[1], b, "👍").await.unwrap();
    backend.store.add_reaction(ids[1], b, "👍").await.unwrap();
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM message_reactions WHERE message_id = $1")
            .bind(ids[1])
            .fetch_one(&backend.pool)
            .await
            .unwrap();
    assert_eq!(count, 1);

    // Removing a reaction that is not there is a no-op, not an error.
    backend.store.remove_reaction(ids[0], b, "🎉").await.unwrap();

    // B marks message 2 as read: receipts for 1 and 2, message 3 unread.
    let marked = backend.store.mark_as_read(group, b, ids[1]).await.unwrap();
    assert_eq!(marked, 2);
    assert_eq!(backend.store.get_unread_count(group, b).await.unwrap(), 1);

    // Reaction summary from each side of the mirror.
    let for_a = backend.store.get_message_reactions(ids[1], a).await.unwrap();
    assert_eq!(for_a.len(), 1);
    assert_eq!(for_a[0].emoji, "👍");
    assert_eq!(for_a[0].count, 1);
    assert_eq!(for_a[0].users, vec![b]);
    assert!(!for_a[0].has_reacted);

    let for_b = backend.store.get_message_reactions(ids[1], b).await.unwrap();
    assert!(for_b[0].has_reacted);
}

#[tokio::test]
#[ignore]
async fn edit_and_delete_authorization() {
    let backend = bootstrap(100).await;
    let group = seed_group(&backend.pool).await;
    let a = seed_user(&backend.pool, "admin-a").await;
    let b = seed_user(&backend.pool, "member-b").await;
    let c = seed_user(&backend.pool, "member-c").await;
    seed_member(&backend.pool, group, a, "admin").await;
    seed_member(&backend.pool, group, b, "member").await;
    seed_member(&backend.pool, group, c, "member").await;
    for user in [a, b, c] {
        grant_key(&backend, group, user).await;
    }

    let a_msg = backend
        .store
        .send_message(send_input(group, a, "a's message"))
        .await
        .unwrap();
    let b_msg = backend
        .store
        .send_message(send_input(group, b, "b's message"))
        .await
        .unwrap();

    // Non-sender cannot edit, even a fellow member.
    let err = backend
        .store
        .edit_message(a_msg.id, c, "hijacked")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization));

    // The sender can, and the edit is flagged.
    let edited = backend
        .store
        .edit_message(a_msg.id, a, "a's corrected message")
        .await
        .unwrap();
    assert!(edited.is_edited);
    assert_eq!(edited.content, "a's corrected message");

    // Plain member cannot delete someone else's message…
    let err = backend.store.delete_message(b_msg.id, c).await.unwrap_err();
    assert!(matches!(err, AppError::Authorization));

    // …but an admin can (soft delete).
    backend.store.delete_message(b_msg.id, a).await.unwrap();
    let (is_deleted, deleted_by): (bool, Option<Uuid>) = sqlx::query_as(
        "SELECT is_deleted, deleted_by FROM messages WHERE id = $1",
    )
    .bind(b_msg.id)
    .fetch_one(&backend.pool)
    .await
    .unwrap();
    assert!(is_deleted);
    assert_eq!(deleted_by, Some(a));
}

#[tokio::test]
#[ignore]
async fn send_rate_limit_rejects_over_budget() {
    let backend = bootstrap(3).await;
    let group = seed_group(&backend.pool).await;
    let alice = seed_user(&backend.pool, "alice").await;
    seed_member(&backend.pool, group, alice, "owner").await;
    grant_key(&backend, group, alice).await;

    for i in 0..3 {
        backend
            .store
            .send_message(send_input(group, alice, &format!("burst {i}")))
            .await
            .unwrap();
    }
    let err = backend
        .store
        .send_message(send_input(group, alice, "one too many"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RateLimited { .. }));
}

#[tokio::test]
#[ignore]
async fn dedupe_id_returns_original_message() {
    let backend = bootstrap(100).await;
    let group = seed_group(&backend.pool).await;
    let alice = seed_user(&backend.pool, "alice").await;
    seed_member(&backend.pool, group, alice, "owner").await;
    grant_key(&backend, group, alice).await;

    let mut input = send_input(group, alice, "exactly once");
    input.client_dedupe_id = Some(format!("dedupe-{}", Uuid::new_v4()));

    let first = backend.store.send_message(input.clone()).await.unwrap();
    let replay = backend.store.send_message(input).await.unwrap();
    assert_eq!(first.id, replay.id);

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE group_id = $1",
    )
    .bind(group)
    .fetch_one(&backend.pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore]
async fn replies_reuse_thread_root_and_are_hidden_from_root_listing() {
    let backend = bootstrap(100).await;
    let group = seed_group(&backend.pool).await;
    let alice = seed_user(&backend.pool, "alice").await;
    seed_member(&backend.pool, group, alice, "owner").await;
    grant_key(&backend, group, alice).await;

    let root = backend
        .store
        .send_message(send_input(group, alice, "root"))
        .await
        .unwrap();

    let mut reply = send_input(group, alice, "first reply");
    reply.parent_message_id = Some(root.id);
    let reply = backend.store.send_message(reply).await.unwrap();
    assert_eq!(reply.thread_root_id, Some(root.id));

    // Replying to the reply still roots at the original message.
    let mut nested = send_input(group, alice, "nested reply");
    nested.parent_message_id = Some(reply.id);
    let nested = backend.store.send_message(nested).await.unwrap();
    assert_eq!(nested.thread_root_id, Some(root.id));

    let roots = backend
        .store
        .get_messages(group, alice, GetMessagesOptions::default())
        .await
        .unwrap();
    assert_eq!(roots.messages.len(), 1);

    let thread = backend
        .store
        .get_messages(
            group,
            alice,
            GetMessagesOptions {
                thread_root_id: Some(root.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(thread.messages.len(), 3);
}

#[tokio::test]
#[ignore]
async fn mentions_resolve_to_member_records() {
    let backend = bootstrap(100).await;
    let group = seed_group(&backend.pool).await;
    let alice = seed_user(&backend.pool, "alice").await;
    let bob = seed_user(&backend.pool, "bob").await;
    seed_member(&backend.pool, group, alice, "owner").await;
    seed_member(&backend.pool, group, bob, "member").await;
    grant_key(&backend, group, alice).await;

    let bob_username: String = sqlx::query_scalar("SELECT username FROM users WHERE id = $1")
        .bind(bob)
        .fetch_one(&backend.pool)
        .await
        .unwrap();

    let view = backend
        .store
        .send_message(send_input(
            group,
            alice,
            &format!("hey @{bob_username}, look at this"),
        ))
        .await
        .unwrap();

    let mentioned: Vec<Uuid> = sqlx::query_scalar(
        "SELECT mentioned_user_id FROM message_mentions WHERE message_id = $1",
    )
    .bind(view.id)
    .fetch_all(&backend.pool)
    .await
    .unwrap();
    assert_eq!(mentioned, vec![bob]);
}

#[tokio::test]
#[ignore]
async fn corrupt_ciphertext_degrades_to_placeholder_not_error() {
    let backend = bootstrap(100).await;
    let group = seed_group(&backend.pool).await;
    let alice = seed_user(&backend.pool, "alice").await;
    seed_member(&backend.pool, group, alice, "owner").await;
    grant_key(&backend, group, alice).await;

    let good = backend
        .store
        .send_message(send_input(group, alice, "good message"))
        .await
        .unwrap();
    let bad = backend
        .store
        .send_message(send_input(group, alice, "about to be mangled"))
        .await
        .unwrap();

    sqlx::query("UPDATE messages SET ciphertext = $2 WHERE id = $1")
        .bind(bad.id)
        .bind(vec![0u8; 64])
        .execute(&backend.pool)
        .await
        .unwrap();

    let page = backend
        .store
        .get_messages(group, alice, GetMessagesOptions::default())
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 2);
    let by_id = |id: Uuid| page.messages.iter().find(|m| m.id == id).unwrap();
    assert_eq!(by_id(good.id).content, "good message");
    assert_eq!(by_id(bad.id).content, DECRYPT_PLACEHOLDER);
}

#[tokio::test]
#[ignore]
async fn offline_member_gets_queue_entry_and_reconnect_drains_it() {
    let backend = bootstrap(100).await;
    let group = seed_group(&backend.pool).await;
    let alice = seed_user(&backend.pool, "alice").await;
    let bob = seed_user(&backend.pool, "bob").await;
    seed_member(&backend.pool, group, alice, "owner").await;
    seed_member(&backend.pool, group, bob, "member").await;
    grant_key(&backend, group, alice).await;

    // Wire a real broadcaster for this test.
    let membership = Arc::new(SqlMembershipDirectory::new(backend.pool.clone()));
    let registry = ConnectionRegistry::new();
    let cache = Arc::new(InMemoryStore::new());
    let (publisher, events) = EventPublisher::channel();
    let presence = PresenceTracker::new(
        backend.pool.clone(),
        cache,
        publisher.clone(),
        60,
    );
    let queue = OfflineDeliveryQueue::new(backend.pool.clone(), 7, 5);
    DeliveryBroadcaster::new(
        registry.clone(),
        membership,
        presence,
        queue.clone(),
    )
    .spawn(events);

    let message = backend
        .store
        .send_message(send_input(group, alice, "while you were out"))
        .await
        .unwrap();
    publisher.publish(ChatEvent::MessageNew {
        group_id: group,
        message_id: message.id,
        sender_id: alice,
        sequence_number: message.sequence_number,
        thread_root_id: None,
    });

    // Give the worker a beat to fan out.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let pending = queue.pending_for_recipient(bob).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message_id, message.id);
    assert_eq!(pending[0].delivery_status(), DeliveryStatus::Pending);

    // Bob reconnects; the drain delivers and the entry goes terminal.
    let mut rx = registry.register(bob, Uuid::new_v4()).await;
    let sweeper = DeliverySweeper::new(backend.pool.clone(), queue.clone(), registry.clone(), 30);
    sweeper.flush_recipient(bob).await.unwrap();

    let frame = rx.recv().await.expect("queued event delivered");
    let axum::extract::ws::Message::Text(text) = frame else {
        panic!("expected text frame");
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "message.new");
    assert_eq!(value["message_id"], message.id.to_string());

    assert!(queue.pending_for_recipient(bob).await.unwrap().is_empty());
}

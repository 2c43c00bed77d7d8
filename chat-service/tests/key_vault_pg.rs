//! KeyVault integration tests against a real Postgres.
//!
//! Run with: DATABASE_URL=postgres://... cargo test --test key_vault_pg -- --ignored

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

use chat_service::error::AppError;
use chat_service::services::key_vault::KeyVault;
use chat_service::services::membership::{MembershipDirectory, SqlMembershipDirectory};

const TEST_MASTER_KEY: [u8; 32] = [7u8; 32];

async fn bootstrap_pool() -> PgPool {
    let db_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL env var required for vault tests");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await
        .expect("failed to connect to DATABASE_URL");
    chat_service::db::MIGRATOR
        .run(&pool)
        .await
        .expect("migrations");
    pool
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
    sqlx::query(
        "INSERT INTO group_members (group_id, user_id, role) VALUES ($1, $2, $3)",
    )
    .bind(group_id)
    .bind(user_id)
    .bind(role)
    .execute(pool)
    .await
    .expect("seed member");
}

fn vault(pool: &PgPool) -> KeyVault {
    let membership = Arc::new(SqlMembershipDirectory::new(pool.clone()));
    KeyVault::new(pool.clone(), membership, TEST_MASTER_KEY)
}

#[tokio::test]
#[ignore]
async fn at_most_one_active_key_and_versions_increase() {
    let pool = bootstrap_pool().await;
    let group = seed_group(&pool).await;
    let vault = vault(&pool);

    vault.generate_group_key(group).await.unwrap();
    vault.generate_group_key(group).await.unwrap();
    vault.generate_group_key(group).await.unwrap();

    let rows = sqlx::query(
        "SELECT version, status FROM group_keys WHERE group_id = $1 ORDER BY version",
    )
    .bind(group)
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(rows.len(), 3);
    let versions: Vec<i32> = rows.iter().map(|r| r.get("version")).collect();
    assert_eq!(versions, vec![1, 2, 3]);

    let active: Vec<i32> = rows
        .iter()
        .filter(|r| r.get::<String, _>("status") == "active")
        .map(|r| r.get("version"))
        .collect();
    assert_eq!(active, vec![3]);
}

#[tokio::test]
#[ignore]
async fn member_round_trip_and_non_member_failure() {
    let pool = bootstrap_pool().await;
    let group = seed_group(&pool).await;
    let member = seed_user(&pool, "member").await;
    let outsider = seed_user(&pool, "outsider").await;
    seed_member(&pool, group, member, "member").await;

    let vault = vault(&pool);
    let key = vault.active_key(group).await.unwrap();
    vault
        .distribute_key_to_member(group, member, key.key_id, None)
        .await
        .unwrap();

    let package = vault
        .encrypt_for_group(b"the plan is saturday", key.key_id)
        .await
        .unwrap();

    let plain = vault
        .decrypt_for_user(&package, key.key_id, member, group)
        .await
        .unwrap();
    assert_eq!(plain, b"the plan is saturday");

    // No grant: ciphertext alone is useless.
    let err = vault
        .decrypt_for_user(&package, key.key_id, outsider, group)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Crypto(_)));
}

#[tokio::test]
#[ignore]
async fn revocation_leaves_zero_active_grants_and_blocks_decryption() {
    let pool = bootstrap_pool().await;
    let group = seed_group(&pool).await;
    let leaver = seed_user(&pool, "leaver").await;
    seed_member(&pool, group, leaver, "member").await;

    let vault = vault(&pool);
    let key = vault.active_key(group).await.unwrap();
    vault
        .distribute_key_to_member(group, leaver, key.key_id, None)
        .await
        .unwrap();

    let package = vault.encrypt_for_group(b"history", key.key_id).await.unwrap();
    assert!(vault
        .decrypt_for_user(&package, key.key_id, leaver, group)
        .await
        .is_ok());

    vault.revoke_user_access(group, leaver).await.unwrap();

    let active_grants: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM member_key_grants \
         WHERE group_id = $1 AND user_id = $2 AND status = 'active'",
    )
    .bind(group)
    .bind(leaver)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(active_grants, 0);

    // The raw ciphertext is still in their hands; the vault no longer helps.
    let err = vault
        .decrypt_for_user(&package, key.key_id, leaver, group)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Crypto(_)));
}

#[tokio::test]
#[ignore]
async fn rotation_bumps_version_by_one_and_redistributes() {
    let pool = bootstrap_pool().await;
    let group = seed_group(&pool).await;
    let a = seed_user(&pool, "a").await;
    let b = seed_user(&pool, "b").await;
    seed_member(&pool, group, a, "owner").await;
    seed_member(&pool, group, b, "member").await;

    let vault = vault(&pool);
    let v1 = vault.active_key(group).await.unwrap();
    assert_eq!(v1.version, 1);

    vault.rotate_group_key(group).await.unwrap();
    let v2 = vault.active_key(group).await.unwrap();
    assert_eq!(v2.version, v1.version + 1);

    // Every active member holds an active grant at the new version.
    for user in [a, b] {
        let version: i32 = sqlx::query_scalar(
            "SELECT key_version FROM member_key_grants \
             WHERE group_id = $1 AND user_id = $2 AND status = 'active' \
             ORDER BY key_version DESC LIMIT 1",
        )
        .bind(group)
        .bind(user)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(version, v2.version);
    }
}

#[tokio::test]
#[ignore]
async fn rotation_keeps_prior_ciphertext_decryptable() {
    let pool = bootstrap_pool().await;
    let group = seed_group(&pool).await;
    let member = seed_user(&pool, "member").await;
    seed_member(&pool, group, member, "member").await;

    let vault = vault(&pool);
    let old_key = vault.active_key(group).await.unwrap();
    let old_package = vault
        .encrypt_for_group(b"before rotation", old_key.key_id)
        .await
        .unwrap();

    vault.rotate_group_key(group).await.unwrap();
    let new_key = vault.active_key(group).await.unwrap();
    assert_ne!(new_key.key_id, old_key.key_id);

    // Policy under test: key lookup by id ignores status, so history
    // stays readable for members; only new encryption moves to the new key.
    let plain = vault
        .decrypt_for_user(&old_package, old_key.key_id, member, group)
        .await
        .unwrap();
    assert_eq!(plain, b"before rotation");

    let new_package = vault
        .encrypt_for_group(b"after rotation", new_key.key_id)
        .await
        .unwrap();
    let plain = vault
        .decrypt_for_user(&new_package, new_key.key_id, member, group)
        .await
        .unwrap();
    assert_eq!(plain, b"after rotation");
}

#[tokio::test]
#[ignore]
async fn distribute_is_upsert_per_version() {
    let pool = bootstrap_pool().await;
    let group = seed_group(&pool).await;
    let member = seed_user(&pool, "member").await;
    seed_member(&pool, group, member, "member").await;

    let vault = vault(&pool);
    let key = vault.active_key(group).await.unwrap();
    let first = vault
        .distribute_key_to_member(group, member, key.key_id, None)
        .await
        .unwrap();
    let second = vault
        .distribute_key_to_member(group, member, key.key_id, None)
        .await
        .unwrap();
    // Same (group, user, version) row, refreshed in place.
    assert_eq!(first, second);

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM member_key_grants WHERE group_id = $1 AND user_id = $2",
    )
    .bind(group)
    .bind(member)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);

    let membership = Arc::new(SqlMembershipDirectory::new(pool.clone()));
    assert!(membership.is_active_member(group, member).await.unwrap());
}

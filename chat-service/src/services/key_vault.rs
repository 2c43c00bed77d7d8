//! Layered key management for group content encryption.
//!
//! Envelope scheme: each group has one `active` content key, stored wrapped
//! under the system master key. Every active member additionally holds a
//! copy of that key wrapped under a key derived from their user id, so a
//! message is encrypted once per group and independently decryptable per
//! member. Rotation expires the old key for new encryption only; see
//! `resolve_key_by_id`.

use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crypto_core::SecretKey;

use crate::error::{AppError, AppResult};
use crate::models::{GrantStatus, GroupKey, KeyStatus, MemberKeyGrant};
use crate::services::membership::SharedMembership;

const ALGORITHM: &str = "aes-256-gcm";

/// Resolved key material for one group key row.
#[derive(Clone)]
pub struct ResolvedKey {
    pub key_id: Uuid,
    pub group_id: Uuid,
    pub version: i32,
    pub key: SecretKey,
}

pub struct KeyVault {
    db: PgPool,
    membership: SharedMembership,
    master_key: [u8; 32],
    // Process-local caches; a multi-instance deployment re-derives per
    // instance.
    key_cache: Arc<RwLock<HashMap<Uuid, ResolvedKey>>>,
    wrap_key_cache: Arc<RwLock<HashMap<Uuid, SecretKey>>>,
}

impl KeyVault {
    pub fn new(db: PgPool, membership: SharedMembership, master_key: [u8; 32]) -> Self {
        Self {
            db,
            membership,
            master_key,
            key_cache: Arc::new(RwLock::new(HashMap::new())),
            wrap_key_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Generate a fresh 256-bit group key, wrap it under the master key and
    /// store it as the group's new `active` key at `current max version + 1`.
    /// Any previously active key is expired in the same transaction.
    pub async fn generate_group_key(&self, group_id: Uuid) -> AppResult<Uuid> {
        let raw = SecretKey::from_bytes(crypto_core::generate_key());
        let wrapped = crypto_core::wrap_key(&self.master_key, &raw)?;
        let key_id = Uuid::new_v4();

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE group_keys SET status = 'expired' WHERE group_id = $1 AND status = 'active'")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        let version: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM group_keys WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO group_keys (id, group_id, version, wrapped_key, algorithm, status) \
             VALUES ($1, $2, $3, $4, $5, 'active')",
        )
        .bind(key_id)
        .bind(group_id)
        .bind(version)
        .bind(&wrapped)
        .bind(ALGORITHM)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.key_cache.write().await.insert(
            key_id,
            ResolvedKey {
                key_id,
                group_id,
                version,
                key: raw,
            },
        );

        tracing::info!(%group_id, version, "generated group key");
        Ok(key_id)
    }

    /// Wrap the group key for one member and upsert their grant as `active`.
    /// `version` defaults to the key's own version.
    pub async fn distribute_key_to_member(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        key_id: Uuid,
        version: Option<i32>,
    ) -> AppResult<Uuid> {
        let resolved = self.resolve_key_by_id(key_id).await?;
        if resolved.group_id != group_id {
            return Err(AppError::Crypto("key does not belong to group".into()));
        }

        let wrap_key = self.user_wrap_key(user_id).await?;
        let wrapped_for_user = crypto_core::wrap_key(wrap_key.as_bytes(), &resolved.key)?;

        let grant_id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO member_key_grants
                (id, group_id, user_id, key_version, wrapped_key_for_user, status, distributed_at)
            VALUES ($1, $2, $3, $4, $5, 'active', NOW())
            ON CONFLICT (group_id, user_id, key_version) DO UPDATE
                SET wrapped_key_for_user = EXCLUDED.wrapped_key_for_user,
                    status = 'active',
                    distributed_at = NOW()
            RETURNING id
            "#,
        )
        .bind(grant_id)
        .bind(group_id)
        .bind(user_id)
        .bind(version.unwrap_or(resolved.version))
        .bind(&wrapped_for_user)
        .fetch_one(&self.db)
        .await?;

        Ok(row.get("id"))
    }

    /// Revoke every grant the user holds for the group and drop any cached
    /// material that could leak the key to a revoked session.
    pub async fn revoke_user_access(&self, group_id: Uuid, user_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE member_key_grants SET status = 'revoked' \
             WHERE group_id = $1 AND user_id = $2 AND status = 'active'",
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        self.wrap_key_cache.write().await.remove(&user_id);
        tracing::info!(%group_id, %user_id, "revoked key access");
        Ok(())
    }

    /// Expire the current key, generate a successor, and redistribute it to
    /// every currently active member.
    pub async fn rotate_group_key(&self, group_id: Uuid) -> AppResult<Uuid> {
        let new_key_id = self.generate_group_key(group_id).await?;

        for member in self.membership.active_members(group_id).await? {
            self.distribute_key_to_member(group_id, member, new_key_id, None)
                .await?;
        }

        tracing::info!(%group_id, %new_key_id, "rotated group key");
        Ok(new_key_id)
    }

    /// The group's current active key, generating the first one on demand.
    pub async fn active_key(&self, group_id: Uuid) -> AppResult<ResolvedKey> {
        let row = sqlx::query(
            "SELECT id FROM group_keys WHERE group_id = $1 AND status = 'active'",
        )
        .bind(group_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => self.resolve_key_by_id(row.get("id")).await,
            None => {
                let key_id = self.generate_group_key(group_id).await?;
                self.resolve_key_by_id(key_id).await
            }
        }
    }

    /// Encrypt plaintext under the given group key with a fresh nonce.
    pub async fn encrypt_for_group(&self, plaintext: &[u8], key_id: Uuid) -> AppResult<Vec<u8>> {
        let resolved = self.resolve_key_by_id(key_id).await?;
        Ok(crypto_core::seal_package(resolved.key.as_bytes(), plaintext)?)
    }

    /// Decrypt a package on behalf of a member.
    ///
    /// Requires an `active` grant for (group, user) — a revoked or absent
    /// grant fails with a crypto error even if the caller somehow holds the
    /// ciphertext. When the grant matches the package's key version the
    /// group key is recovered through the member's own wrapped copy;
    /// otherwise (history older than the member's current grant) through
    /// the master key.
    pub async fn decrypt_for_user(
        &self,
        package: &[u8],
        key_id: Uuid,
        user_id: Uuid,
        group_id: Uuid,
    ) -> AppResult<Vec<u8>> {
        let grant = sqlx::query(
            "SELECT key_version, wrapped_key_for_user FROM member_key_grants \
             WHERE group_id = $1 AND user_id = $2 AND status = 'active' \
             ORDER BY key_version DESC LIMIT 1",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::Crypto("no active key grant".into()))?;

        let resolved = self.resolve_key_by_id(key_id).await?;
        if resolved.group_id != group_id {
            return Err(AppError::Crypto("key does not belong to group".into()));
        }

        let grant_version: i32 = grant.get("key_version");
        let key = if grant_version == resolved.version {
            let wrapped: Vec<u8> = grant.get("wrapped_key_for_user");
            let wrap_key = self.user_wrap_key(user_id).await?;
            crypto_core::unwrap_key(wrap_key.as_bytes(), &wrapped)?
        } else {
            resolved.key.clone()
        };

        Ok(crypto_core::open_package(key.as_bytes(), package)?)
    }

    /// The user's most recent grant for a group, for administrative views.
    pub async fn grant_status(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<MemberKeyGrant>> {
        let row = sqlx::query(
            "SELECT id, group_id, user_id, key_version, wrapped_key_for_user, status, \
                    distributed_at \
             FROM member_key_grants \
             WHERE group_id = $1 AND user_id = $2 \
             ORDER BY distributed_at DESC LIMIT 1",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| {
            let status: String = r.get("status");
            MemberKeyGrant {
                id: r.get("id"),
                group_id: r.get("group_id"),
                user_id: r.get("user_id"),
                key_version: r.get("key_version"),
                wrapped_key_for_user: r.get("wrapped_key_for_user"),
                status: GrantStatus::from_db(&status),
                distributed_at: r.get("distributed_at"),
            }
        }))
    }

    /// Unwrap a stored key by id, cache-first.
    ///
    /// Lookup deliberately ignores `status`: an expired key stays usable
    /// for decrypting the history it protected, and `active_key` is the
    /// only path that selects a key for new encryption.
    async fn resolve_key_by_id(&self, key_id: Uuid) -> AppResult<ResolvedKey> {
        if let Some(hit) = self.key_cache.read().await.get(&key_id) {
            return Ok(hit.clone());
        }

        let row = sqlx::query(
            "SELECT id, group_id, version, wrapped_key, algorithm, status, created_at \
             FROM group_keys WHERE id = $1",
        )
        .bind(key_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound("group key"))?;

        let status: String = row.get("status");
        let record = GroupKey {
            id: row.get("id"),
            group_id: row.get("group_id"),
            version: row.get("version"),
            wrapped_key: row.get("wrapped_key"),
            algorithm: row.get("algorithm"),
            status: KeyStatus::from_db(&status),
            created_at: row.get("created_at"),
        };

        let key = crypto_core::unwrap_key(&self.master_key, &record.wrapped_key)?;
        let resolved = ResolvedKey {
            key_id,
            group_id: record.group_id,
            version: record.version,
            key,
        };
        if record.status == KeyStatus::Expired {
            tracing::debug!(%key_id, "resolved expired key for history decryption");
        }

        self.key_cache
            .write()
            .await
            .insert(key_id, resolved.clone());
        Ok(resolved)
    }

    /// Derived wrapping key for a member, cache-first. Argon2id is CPU-heavy
    /// so the derivation runs on the blocking pool.
    async fn user_wrap_key(&self, user_id: Uuid) -> AppResult<SecretKey> {
        if let Some(hit) = self.wrap_key_cache.read().await.get(&user_id) {
            return Ok(hit.clone());
        }

        let master = self.master_key;
        let derived = tokio::task::spawn_blocking(move || {
            crypto_core::derive_user_wrap_key(&master, user_id.as_bytes())
        })
        .await
        .map_err(|_| AppError::Internal)??;

        self.wrap_key_cache
            .write()
            .await
            .insert(user_id, derived.clone());
        Ok(derived)
    }
}

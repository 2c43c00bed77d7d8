//! Message persistence and the operations hanging off it: threading,
//! pagination, reactions, read receipts, pinning, mentions.
//!
//! Plaintext exists only in flight. Writes seal content through the
//! KeyVault before touching the database; reads decrypt per row on behalf
//! of the requesting member and degrade to a placeholder when a row cannot
//! be decrypted, so one poisoned message never fails a page.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::SharedStore;
use crate::error::{AppError, AppResult};
use crate::models::{Attachment, Message, MessageStatus, PinnedMessage, Reaction};
use crate::services::broadcaster::EventPublisher;
use crate::services::content;
use crate::services::key_vault::KeyVault;
use crate::services::membership::SharedMembership;
use crate::services::rate_limit::{Operation, RateLimiter};
use crate::websocket::events::ChatEvent;

pub const DECRYPT_PLACEHOLDER: &str = "[unable to decrypt]";
pub const DELETED_PLACEHOLDER: &str = "[deleted]";

const MESSAGE_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

fn message_cache_key(message_id: Uuid) -> String {
    format!("message:{message_id}")
}

fn unread_cache_key(group_id: Uuid, user_id: Uuid) -> String {
    format!("unread:{group_id}:{user_id}")
}

#[derive(Debug, Clone)]
pub struct AttachmentInput {
    pub file_name: String,
    pub content_type: Option<String>,
    pub file_size: i64,
}

#[derive(Debug, Clone)]
pub struct SendMessageInput {
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_type: Option<String>,
    pub parent_message_id: Option<Uuid>,
    pub client_dedupe_id: Option<String>,
    pub attachments: Vec<AttachmentInput>,
}

/// A message decrypted for one caller. This is what leaves the service;
/// ciphertext never does.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_type: String,
    pub sequence_number: i64,
    pub parent_message_id: Option<Uuid>,
    pub thread_root_id: Option<Uuid>,
    pub thread_reply_count: i32,
    pub metadata: serde_json::Value,
    pub status: MessageStatus,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct GetMessagesOptions {
    pub limit: Option<i64>,
    pub before: Option<Uuid>,
    pub after: Option<Uuid>,
    pub thread_root_id: Option<Uuid>,
    pub include_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    pub has_more: bool,
    pub next_cursor: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: i64,
    pub users: Vec<Uuid>,
    pub has_reacted: bool,
}

#[derive(Clone)]
pub struct MessageLimits {
    pub max_content_len: usize,
    pub max_attachments: usize,
    pub unread_cache_ttl: Duration,
}

pub struct MessageStore {
    db: PgPool,
    key_vault: Arc<KeyVault>,
    membership: SharedMembership,
    rate_limiter: RateLimiter,
    cache: SharedStore,
    publisher: EventPublisher,
    limits: MessageLimits,
}

impl MessageStore {
    pub fn new(
        db: PgPool,
        key_vault: Arc<KeyVault>,
        membership: SharedMembership,
        rate_limiter: RateLimiter,
        cache: SharedStore,
        publisher: EventPublisher,
        limits: MessageLimits,
    ) -> Self {
        Self {
            db,
            key_vault,
            membership,
            rate_limiter,
            cache,
            publisher,
            limits,
        }
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    pub async fn send_message(&self, input: SendMessageInput) -> AppResult<MessageView> {
        if input.content.trim().is_empty() {
            return Err(AppError::Validation("content must not be empty".into()));
        }
        if input.content.chars().count() > self.limits.max_content_len {
            return Err(AppError::Validation(format!(
                "content exceeds {} characters",
                self.limits.max_content_len
            )));
        }
        if input.attachments.len() > self.limits.max_attachments {
            return Err(AppError::Validation(format!(
                "too many attachments (max {})",
                self.limits.max_attachments
            )));
        }
        if input.attachments.iter().any(|a| a.file_size <= 0) {
            return Err(AppError::Validation("attachment size must be positive".into()));
        }

        self.rate_limiter
            .check(input.sender_id, input.group_id, Operation::SendMessage)
            .await?;

        if !self
            .membership
            .is_active_member(input.group_id, input.sender_id)
            .await?
        {
            return Err(AppError::Authorization);
        }

        // Replayed send: hand back what was already persisted.
        if let Some(dedupe_id) = input.client_dedupe_id.as_deref() {
            let existing = sqlx::query(
                "SELECT id FROM messages WHERE sender_id = $1 AND client_dedupe_id = $2",
            )
            .bind(input.sender_id)
            .bind(dedupe_id)
            .fetch_optional(&self.db)
            .await?;
            if let Some(row) = existing {
                return self.get_message(row.get("id"), input.sender_id).await;
            }
        }

        let sanitized = content::sanitize(&input.content);

        let thread_root_id = match input.parent_message_id {
            Some(parent_id) => Some(self.resolve_thread_root(input.group_id, parent_id).await?),
            None => None,
        };

        // Candidate @mentions resolve against the group roster; unknown
        // names are dropped.
        let mut mentioned: Vec<(String, Uuid)> = Vec::new();
        for name in content::extract_mentions(&sanitized) {
            if let Some(user_id) = self
                .membership
                .resolve_username(input.group_id, &name)
                .await?
            {
                mentioned.push((name, user_id));
            }
        }

        let metadata = serde_json::json!({
            "mentions": mentioned.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            "attachment_count": input.attachments.len(),
        });

        let key = self.key_vault.active_key(input.group_id).await?;
        let ciphertext = self
            .key_vault
            .encrypt_for_group(sanitized.as_bytes(), key.key_id)
            .await?;

        let message_id = Uuid::new_v4();
        let content_type = input.content_type.clone().unwrap_or_else(|| "text".into());

        let mut tx = self.db.begin().await?;
        let sequence_number = next_sequence(&mut tx, input.group_id).await?;

        let row = sqlx::query(
            r#"
            INSERT INTO messages
                (id, group_id, sender_id, ciphertext, content_type, key_id, key_version,
                 sequence_number, parent_message_id, thread_root_id, metadata, status,
                 client_dedupe_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'sent', $12)
            RETURNING created_at, updated_at
            "#,
        )
        .bind(message_id)
        .bind(input.group_id)
        .bind(input.sender_id)
        .bind(&ciphertext)
        .bind(&content_type)
        .bind(key.key_id)
        .bind(key.version)
        .bind(sequence_number)
        .bind(input.parent_message_id)
        .bind(thread_root_id)
        .bind(&metadata)
        .bind(input.client_dedupe_id.as_deref())
        .fetch_one(&mut *tx)
        .await?;
        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");

        if let Some(root_id) = thread_root_id {
            sqlx::query(
                "UPDATE messages SET thread_reply_count = thread_reply_count + 1 WHERE id = $1",
            )
            .bind(root_id)
            .execute(&mut *tx)
            .await?;
        }

        for (_, user_id) in &mentioned {
            sqlx::query(
                "INSERT INTO message_mentions (message_id, mentioned_user_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(message_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        for attachment in &input.attachments {
            sqlx::query(
                "INSERT INTO message_attachments (id, message_id, file_name, content_type, file_size) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(message_id)
            .bind(&attachment.file_name)
            .bind(&attachment.content_type)
            .bind(attachment.file_size)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE group_members SET unread_count = unread_count + 1 \
             WHERE group_id = $1 AND user_id <> $2 AND is_active",
        )
        .bind(input.group_id)
        .bind(input.sender_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let record = Message {
            id: message_id,
            group_id: input.group_id,
            sender_id: input.sender_id,
            ciphertext,
            content_type: content_type.clone(),
            key_id: key.key_id,
            key_version: key.version,
            sequence_number,
            parent_message_id: input.parent_message_id,
            thread_root_id,
            thread_reply_count: 0,
            metadata: metadata.clone(),
            status: MessageStatus::Sent,
            is_edited: false,
            edit_count: 0,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            client_dedupe_id: input.client_dedupe_id,
            created_at,
            updated_at,
        };
        self.cache_record(&record).await;

        self.publisher.publish(ChatEvent::MessageNew {
            group_id: input.group_id,
            message_id,
            sender_id: input.sender_id,
            sequence_number,
            thread_root_id,
        });

        // The sender gets their plaintext back; everyone else re-fetches
        // and decrypts through their own grant.
        Ok(view_with_content(&record, sanitized))
    }

    async fn resolve_thread_root(&self, group_id: Uuid, parent_id: Uuid) -> AppResult<Uuid> {
        let parent = sqlx::query(
            "SELECT group_id, thread_root_id FROM messages WHERE id = $1 AND is_deleted = FALSE",
        )
        .bind(parent_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound("parent message"))?;

        let parent_group: Uuid = parent.get("group_id");
        if parent_group != group_id {
            return Err(AppError::Validation(
                "parent message belongs to another group".into(),
            ));
        }

        // Replies to a reply collapse onto the existing root.
        let existing_root: Option<Uuid> = parent.get("thread_root_id");
        Ok(existing_root.unwrap_or(parent_id))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub async fn get_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<MessageView> {
        let record = self.load_record(message_id).await?;
        if !self
            .membership
            .is_active_member(record.group_id, user_id)
            .await?
        {
            return Err(AppError::Authorization);
        }
        Ok(self.decrypt_view(&record, user_id).await)
    }

    pub async fn get_messages(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        options: GetMessagesOptions,
    ) -> AppResult<MessagePage> {
        if !self.membership.is_active_member(group_id, user_id).await? {
            return Err(AppError::Authorization);
        }

        let limit = options
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        // Cursors are message ids; paging compares by creation time,
        // strictly, so pages never overlap under concurrent inserts.
        let before_ts = match options.before {
            Some(id) => Some(self.cursor_timestamp(group_id, id).await?),
            None => None,
        };
        let after_ts = match options.after {
            Some(id) => Some(self.cursor_timestamp(group_id, id).await?),
            None => None,
        };

        let mut sql = String::from(
            "SELECT id, group_id, sender_id, ciphertext, content_type, key_id, key_version, \
                    sequence_number, parent_message_id, thread_root_id, thread_reply_count, \
                    metadata, status, is_edited, edit_count, edited_at, is_deleted, deleted_at, \
                    deleted_by, client_dedupe_id, created_at, updated_at \
             FROM messages WHERE group_id = $1",
        );
        match options.thread_root_id {
            Some(_) => sql.push_str(" AND (thread_root_id = $2 OR id = $2)"),
            // Root messages only unless a thread is requested.
            None => sql.push_str(" AND thread_root_id IS NULL"),
        }
        if !options.include_deleted {
            sql.push_str(" AND is_deleted = FALSE");
        }

        let ascending = after_ts.is_some() && before_ts.is_none();
        let mut bind_idx = if options.thread_root_id.is_some() { 3 } else { 2 };
        if before_ts.is_some() {
            sql.push_str(&format!(" AND created_at < ${bind_idx}"));
            bind_idx += 1;
        }
        if after_ts.is_some() {
            sql.push_str(&format!(" AND created_at > ${bind_idx}"));
            bind_idx += 1;
        }
        if ascending {
            sql.push_str(&format!(
                " ORDER BY created_at ASC, sequence_number ASC LIMIT ${bind_idx}"
            ));
        } else {
            sql.push_str(&format!(
                " ORDER BY created_at DESC, sequence_number DESC LIMIT ${bind_idx}"
            ));
        }

        let mut query = sqlx::query(&sql).bind(group_id);
        if let Some(root) = options.thread_root_id {
            query = query.bind(root);
        }
        if let Some(ts) = before_ts {
            query = query.bind(ts);
        }
        if let Some(ts) = after_ts {
            query = query.bind(ts);
        }
        // One extra row answers has_more without a count query.
        query = query.bind(limit + 1);

        let rows = query.fetch_all(&self.db).await?;
        let has_more = rows.len() as i64 > limit;

        let mut records = rows
            .iter()
            .take(limit as usize)
            .map(Message::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        // The page always leaves here oldest-first; the cursor marks where
        // the newest-first scan stopped.
        let next_cursor = if ascending {
            records.last().map(|m| m.id)
        } else {
            let cursor = records.last().map(|m| m.id);
            records.reverse();
            cursor
        };

        let mut messages = Vec::with_capacity(records.len());
        for record in &records {
            messages.push(self.decrypt_view(record, user_id).await);
        }

        Ok(MessagePage {
            messages,
            has_more,
            next_cursor: if has_more { next_cursor } else { None },
        })
    }

    async fn cursor_timestamp(&self, group_id: Uuid, id: Uuid) -> AppResult<DateTime<Utc>> {
        let row = sqlx::query("SELECT created_at FROM messages WHERE id = $1 AND group_id = $2")
            .bind(id)
            .bind(group_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::NotFound("cursor message"))?;
        Ok(row.get("created_at"))
    }

    // ------------------------------------------------------------------
    // Edit / delete
    // ------------------------------------------------------------------

    pub async fn edit_message(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        new_content: &str,
    ) -> AppResult<MessageView> {
        if new_content.trim().is_empty() {
            return Err(AppError::Validation("content must not be empty".into()));
        }
        if new_content.chars().count() > self.limits.max_content_len {
            return Err(AppError::Validation(format!(
                "content exceeds {} characters",
                self.limits.max_content_len
            )));
        }

        let record = self.load_record(message_id).await?;
        if record.sender_id != user_id {
            return Err(AppError::Authorization);
        }
        if record.is_deleted {
            return Err(AppError::NotFound("message"));
        }

        let sanitized = content::sanitize(new_content);
        // Re-encrypt under the current active key so edits after a rotation
        // land on the new key.
        let key = self.key_vault.active_key(record.group_id).await?;
        let ciphertext = self
            .key_vault
            .encrypt_for_group(sanitized.as_bytes(), key.key_id)
            .await?;

        let row = sqlx::query(
            r#"
            UPDATE messages
            SET ciphertext = $2, key_id = $3, key_version = $4,
                is_edited = TRUE, edit_count = edit_count + 1,
                edited_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING edit_count, edited_at, updated_at
            "#,
        )
        .bind(message_id)
        .bind(&ciphertext)
        .bind(key.key_id)
        .bind(key.version)
        .fetch_one(&self.db)
        .await?;

        self.cache.delete(&message_cache_key(message_id)).await.ok();

        let edit_count: i32 = row.get("edit_count");
        self.publisher.publish(ChatEvent::MessageEdited {
            group_id: record.group_id,
            message_id,
            sender_id: user_id,
            edit_count,
        });

        let mut updated = record;
        updated.ciphertext = ciphertext;
        updated.key_id = key.key_id;
        updated.key_version = key.version;
        updated.is_edited = true;
        updated.edit_count = edit_count;
        updated.edited_at = row.get("edited_at");
        updated.updated_at = row.get("updated_at");
        Ok(view_with_content(&updated, sanitized))
    }

    /// Soft-delete. The sender may always delete their own message; an
    /// owner/admin may delete anyone's.
    pub async fn delete_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let record = self.load_record(message_id).await?;
        if record.is_deleted {
            return Ok(());
        }

        if record.sender_id != user_id {
            let role = self.membership.role(record.group_id, user_id).await?;
            if !role.can_moderate() {
                return Err(AppError::Authorization);
            }
        }

        sqlx::query(
            "UPDATE messages SET is_deleted = TRUE, deleted_at = NOW(), deleted_by = $2, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        self.cache.delete(&message_cache_key(message_id)).await.ok();

        self.publisher.publish(ChatEvent::MessageDeleted {
            group_id: record.group_id,
            message_id,
            deleted_by: user_id,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    pub async fn add_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<()> {
        if emoji.is_empty() || emoji.len() > 32 {
            return Err(AppError::Validation("invalid emoji".into()));
        }

        let record = self.load_record(message_id).await?;
        if !self
            .membership
            .is_active_member(record.group_id, user_id)
            .await?
        {
            return Err(AppError::Authorization);
        }
        self.rate_limiter
            .check(user_id, record.group_id, Operation::Reaction)
            .await?;

        // The (message, user, emoji) key makes a repeat a no-op.
        let result = sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, emoji) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            self.publisher.publish(ChatEvent::ReactionAdded {
                group_id: record.group_id,
                message_id,
                user_id,
                emoji: emoji.to_string(),
            });
        }
        Ok(())
    }

    /// Removing a reaction that does not exist is a no-op, not an error.
    pub async fn remove_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<()> {
        let record = self.load_record(message_id).await?;

        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            self.publisher.publish(ChatEvent::ReactionRemoved {
                group_id: record.group_id,
                message_id,
                user_id,
                emoji: emoji.to_string(),
            });
        }
        Ok(())
    }

    /// Per-emoji counts, the reacting users, and whether the requester is
    /// among them.
    pub async fn get_message_reactions(
        &self,
        message_id: Uuid,
        requesting_user: Uuid,
    ) -> AppResult<Vec<ReactionSummary>> {
        let rows = sqlx::query_as::<_, Reaction>(
            "SELECT message_id, user_id, emoji, created_at FROM message_reactions \
             WHERE message_id = $1 ORDER BY created_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.db)
        .await?;

        let mut order: Vec<String> = Vec::new();
        let mut by_emoji: HashMap<String, Vec<Uuid>> = HashMap::new();
        for reaction in rows {
            if !by_emoji.contains_key(&reaction.emoji) {
                order.push(reaction.emoji.clone());
            }
            by_emoji
                .entry(reaction.emoji)
                .or_default()
                .push(reaction.user_id);
        }

        Ok(order
            .into_iter()
            .map(|emoji| {
                let users = by_emoji.remove(&emoji).unwrap_or_default();
                ReactionSummary {
                    count: users.len() as i64,
                    has_reacted: users.contains(&requesting_user),
                    users,
                    emoji,
                }
            })
            .collect())
    }

    /// Attachment metadata for a message the caller can see.
    pub async fn list_attachments(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Vec<Attachment>> {
        let record = self.load_record(message_id).await?;
        if !self
            .membership
            .is_active_member(record.group_id, user_id)
            .await?
        {
            return Err(AppError::Authorization);
        }

        let attachments = sqlx::query_as::<_, Attachment>(
            "SELECT id, message_id, file_name, content_type, file_size \
             FROM message_attachments WHERE message_id = $1 ORDER BY created_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.db)
        .await?;
        Ok(attachments)
    }

    // ------------------------------------------------------------------
    // Read receipts / unread counts
    // ------------------------------------------------------------------

    /// Insert receipts for every unread message up to and including the
    /// target, then re-sync the unread counter (persisted + cached).
    pub async fn mark_as_read(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<i64> {
        if !self.membership.is_active_member(group_id, user_id).await? {
            return Err(AppError::Authorization);
        }
        let up_to = self.cursor_timestamp(group_id, message_id).await?;

        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO read_receipts (message_id, user_id)
            SELECT m.id, $2
            FROM messages m
            WHERE m.group_id = $1
              AND m.created_at <= $3
              AND m.sender_id <> $2
              AND m.is_deleted = FALSE
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(up_to)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // Remaining unread = messages from others newer than the target
        // with no receipt.
        let unread: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM messages m
            WHERE m.group_id = $1
              AND m.sender_id <> $2
              AND m.is_deleted = FALSE
              AND NOT EXISTS (
                  SELECT 1 FROM read_receipts r
                  WHERE r.message_id = m.id AND r.user_id = $2
              )
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE group_members SET unread_count = $3, last_read_at = NOW() \
             WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(unread as i32)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.cache
            .set(
                &unread_cache_key(group_id, user_id),
                &unread.to_string(),
                Some(self.limits.unread_cache_ttl),
            )
            .await
            .ok();

        self.publisher.publish(ChatEvent::ReadReceipt {
            group_id,
            user_id,
            up_to_message_id: message_id,
            marked_count: inserted as i64,
        });
        Ok(inserted as i64)
    }

    /// Cache-first unread count, falling back to the persisted counter.
    pub async fn get_unread_count(&self, group_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        let key = unread_cache_key(group_id, user_id);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if let Ok(count) = cached.parse::<i64>() {
                return Ok(count);
            }
        }

        let count: i32 = sqlx::query_scalar(
            "SELECT unread_count FROM group_members WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .unwrap_or(0);

        self.cache
            .set(&key, &count.to_string(), Some(self.limits.unread_cache_ttl))
            .await
            .ok();
        Ok(count as i64)
    }

    // ------------------------------------------------------------------
    // Pinning
    // ------------------------------------------------------------------

    pub async fn pin_message(
        &self,
        group_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        note: Option<String>,
    ) -> AppResult<()> {
        let role = self.membership.role(group_id, user_id).await?;
        if !role.can_moderate() {
            return Err(AppError::Authorization);
        }

        let record = self.load_record(message_id).await?;
        if record.group_id != group_id || record.is_deleted {
            return Err(AppError::NotFound("message"));
        }

        sqlx::query(
            r#"
            INSERT INTO pinned_messages (group_id, message_id, pinned_by, pin_order, note)
            VALUES (
                $1, $2, $3,
                (SELECT COALESCE(MAX(pin_order), 0) + 1 FROM pinned_messages WHERE group_id = $1),
                $4
            )
            ON CONFLICT (group_id, message_id) DO UPDATE SET note = EXCLUDED.note
            "#,
        )
        .bind(group_id)
        .bind(message_id)
        .bind(user_id)
        .bind(&note)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn unpin_message(
        &self,
        group_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        let role = self.membership.role(group_id, user_id).await?;
        if !role.can_moderate() {
            return Err(AppError::Authorization);
        }

        sqlx::query("DELETE FROM pinned_messages WHERE group_id = $1 AND message_id = $2")
            .bind(group_id)
            .bind(message_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list_pinned(&self, group_id: Uuid, user_id: Uuid) -> AppResult<Vec<PinnedMessage>> {
        if !self.membership.is_active_member(group_id, user_id).await? {
            return Err(AppError::Authorization);
        }

        let pins = sqlx::query_as::<_, PinnedMessage>(
            "SELECT group_id, message_id, pinned_by, pin_order, note, pinned_at \
             FROM pinned_messages WHERE group_id = $1 ORDER BY pin_order ASC",
        )
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;
        Ok(pins)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn load_record(&self, message_id: Uuid) -> AppResult<Message> {
        let cache_key = message_cache_key(message_id);
        if let Ok(Some(json)) = self.cache.get(&cache_key).await {
            if let Ok(record) = serde_json::from_str::<Message>(&json) {
                return Ok(record);
            }
        }

        let row = sqlx::query(
            "SELECT id, group_id, sender_id, ciphertext, content_type, key_id, key_version, \
                    sequence_number, parent_message_id, thread_root_id, thread_reply_count, \
                    metadata, status, is_edited, edit_count, edited_at, is_deleted, deleted_at, \
                    deleted_by, client_dedupe_id, created_at, updated_at \
             FROM messages WHERE id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound("message"))?;

        let record = Message::from_row(&row)?;
        self.cache_record(&record).await;
        Ok(record)
    }

    /// Cache the encrypted record; plaintext never enters the shared store.
    async fn cache_record(&self, record: &Message) {
        if let Ok(json) = serde_json::to_string(record) {
            self.cache
                .set(&message_cache_key(record.id), &json, Some(MESSAGE_CACHE_TTL))
                .await
                .ok();
        }
    }

    /// Decrypt one record for a member. Failure degrades to the opaque
    /// placeholder instead of erroring the surrounding page.
    async fn decrypt_view(&self, record: &Message, user_id: Uuid) -> MessageView {
        if record.is_deleted {
            return view_with_content(record, DELETED_PLACEHOLDER.to_string());
        }

        let content = match self
            .key_vault
            .decrypt_for_user(&record.ciphertext, record.key_id, user_id, record.group_id)
            .await
        {
            Ok(plaintext) => String::from_utf8(plaintext)
                .unwrap_or_else(|_| DECRYPT_PLACEHOLDER.to_string()),
            Err(e) => {
                tracing::warn!(message_id = %record.id, error = %e, "decrypt failed; substituting placeholder");
                DECRYPT_PLACEHOLDER.to_string()
            }
        };
        view_with_content(record, content)
    }
}

async fn next_sequence(
    tx: &mut Transaction<'_, Postgres>,
    group_id: Uuid,
) -> Result<i64, sqlx::Error> {
    // Row-locked counter; concurrent sends in the same tick serialize here.
    sqlx::query_scalar(
        r#"
        INSERT INTO group_sequences (group_id, next_seq)
        VALUES ($1, 2)
        ON CONFLICT (group_id) DO UPDATE SET next_seq = group_sequences.next_seq + 1
        RETURNING next_seq - 1
        "#,
    )
    .bind(group_id)
    .fetch_one(&mut **tx)
    .await
}

fn view_with_content(record: &Message, content: String) -> MessageView {
    MessageView {
        id: record.id,
        group_id: record.group_id,
        sender_id: record.sender_id,
        content,
        content_type: record.content_type.clone(),
        sequence_number: record.sequence_number,
        parent_message_id: record.parent_message_id,
        thread_root_id: record.thread_root_id,
        thread_reply_count: record.thread_reply_count,
        metadata: record.metadata.clone(),
        status: record.status,
        is_edited: record.is_edited,
        edited_at: record.edited_at,
        is_deleted: record.is_deleted,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(is_deleted: bool) -> Message {
        Message {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            ciphertext: vec![1, 2, 3],
            content_type: "text".into(),
            key_id: Uuid::new_v4(),
            key_version: 1,
            sequence_number: 1,
            parent_message_id: None,
            thread_root_id: None,
            thread_reply_count: 0,
            metadata: serde_json::json!({}),
            status: MessageStatus::Sent,
            is_edited: false,
            edit_count: 0,
            edited_at: None,
            is_deleted,
            deleted_at: None,
            deleted_by: None,
            client_dedupe_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn deleted_record_views_as_placeholder() {
        let record = record(true);
        let view = view_with_content(&record, DELETED_PLACEHOLDER.to_string());
        assert_eq!(view.content, DELETED_PLACEHOLDER);
        assert!(view.is_deleted);
    }

    #[test]
    fn message_record_survives_cache_round_trip() {
        let record = record(false);
        let json = serde_json::to_string(&record).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.ciphertext, record.ciphertext);
        assert_eq!(back.sequence_number, record.sequence_number);
    }
}

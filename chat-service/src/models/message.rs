use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn from_db(value: &str) -> Self {
        match value {
            "sending" => MessageStatus::Sending,
            "delivered" => MessageStatus::Delivered,
            "failed" => MessageStatus::Failed,
            _ => MessageStatus::Sent,
        }
    }
}

/// A persisted message row. `ciphertext` is the sealed package; plaintext
/// only ever exists in flight. Serializable so the (encrypted) record can
/// sit in the message cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub ciphertext: Vec<u8>,
    pub content_type: String,
    pub key_id: Uuid,
    pub key_version: i32,
    pub sequence_number: i64,
    pub parent_message_id: Option<Uuid>,
    pub thread_root_id: Option<Uuid>,
    pub thread_reply_count: i32,
    pub metadata: serde_json::Value,
    pub status: MessageStatus,
    pub is_edited: bool,
    pub edit_count: i32,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub client_dedupe_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Decode a full message row. Failing fast on a missing column beats
    /// carrying loosely-typed rows through the service layer.
    pub fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            group_id: row.try_get("group_id")?,
            sender_id: row.try_get("sender_id")?,
            ciphertext: row.try_get("ciphertext")?,
            content_type: row.try_get("content_type")?,
            key_id: row.try_get("key_id")?,
            key_version: row.try_get("key_version")?,
            sequence_number: row.try_get("sequence_number")?,
            parent_message_id: row.try_get("parent_message_id")?,
            thread_root_id: row.try_get("thread_root_id")?,
            thread_reply_count: row.try_get("thread_reply_count")?,
            metadata: row.try_get("metadata")?,
            status: MessageStatus::from_db(&status),
            is_edited: row.try_get("is_edited")?,
            edit_count: row.try_get("edit_count")?,
            edited_at: row.try_get("edited_at")?,
            is_deleted: row.try_get("is_deleted")?,
            deleted_at: row.try_get("deleted_at")?,
            deleted_by: row.try_get("deleted_by")?,
            client_dedupe_id: row.try_get("client_dedupe_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub file_name: String,
    pub content_type: Option<String>,
    pub file_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PinnedMessage {
    pub group_id: Uuid,
    pub message_id: Uuid,
    pub pinned_by: Uuid,
    pub pin_order: i32,
    pub note: Option<String>,
    pub pinned_at: DateTime<Utc>,
}

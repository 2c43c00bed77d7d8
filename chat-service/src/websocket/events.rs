//! Domain events emitted by the write paths and fanned out by the
//! broadcaster.
//!
//! Content-bearing events carry metadata only — recipients re-fetch and
//! decrypt through their own key grant. Broadcast payloads are flat:
//!
//! ```json
//! {
//!     "type": "message.new",
//!     "timestamp": "2026-01-10T10:30:00Z",
//!     "group_id": "uuid",
//!     "message_id": "uuid",
//!     "sender_id": "uuid",
//!     "sequence_number": 7
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatEvent {
    #[serde(rename = "message.new")]
    MessageNew {
        group_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        sequence_number: i64,
        thread_root_id: Option<Uuid>,
    },

    #[serde(rename = "message.edited")]
    MessageEdited {
        group_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        edit_count: i32,
    },

    #[serde(rename = "message.deleted")]
    MessageDeleted {
        group_id: Uuid,
        message_id: Uuid,
        deleted_by: Uuid,
    },

    #[serde(rename = "reaction.added")]
    ReactionAdded {
        group_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    #[serde(rename = "reaction.removed")]
    ReactionRemoved {
        group_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    #[serde(rename = "receipt.read")]
    ReadReceipt {
        group_id: Uuid,
        user_id: Uuid,
        up_to_message_id: Uuid,
        marked_count: i64,
    },

    #[serde(rename = "typing.started")]
    TypingStarted { group_id: Uuid, user_id: Uuid },

    #[serde(rename = "typing.stopped")]
    TypingStopped { group_id: Uuid, user_id: Uuid },

    #[serde(rename = "presence.changed")]
    PresenceChanged {
        group_id: Uuid,
        user_id: Uuid,
        status: String,
        device_type: Option<String>,
    },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message.new",
            Self::MessageEdited { .. } => "message.edited",
            Self::MessageDeleted { .. } => "message.deleted",
            Self::ReactionAdded { .. } => "reaction.added",
            Self::ReactionRemoved { .. } => "reaction.removed",
            Self::ReadReceipt { .. } => "receipt.read",
            Self::TypingStarted { .. } => "typing.started",
            Self::TypingStopped { .. } => "typing.stopped",
            Self::PresenceChanged { .. } => "presence.changed",
        }
    }

    pub fn group_id(&self) -> Uuid {
        match self {
            Self::MessageNew { group_id, .. }
            | Self::MessageEdited { group_id, .. }
            | Self::MessageDeleted { group_id, .. }
            | Self::ReactionAdded { group_id, .. }
            | Self::ReactionRemoved { group_id, .. }
            | Self::ReadReceipt { group_id, .. }
            | Self::TypingStarted { group_id, .. }
            | Self::TypingStopped { group_id, .. }
            | Self::PresenceChanged { group_id, .. } => *group_id,
        }
    }

    /// The user whose action produced the event; they are skipped during
    /// fan-out.
    pub fn actor(&self) -> Uuid {
        match self {
            Self::MessageNew { sender_id, .. } | Self::MessageEdited { sender_id, .. } => {
                *sender_id
            }
            Self::MessageDeleted { deleted_by, .. } => *deleted_by,
            Self::ReactionAdded { user_id, .. }
            | Self::ReactionRemoved { user_id, .. }
            | Self::ReadReceipt { user_id, .. }
            | Self::TypingStarted { user_id, .. }
            | Self::TypingStopped { user_id, .. }
            | Self::PresenceChanged { user_id, .. } => *user_id,
        }
    }

    /// Only new messages get a durability backstop in the offline queue;
    /// every other event type is fire-and-forget for offline members.
    pub fn queued_when_offline(&self) -> Option<Uuid> {
        match self {
            Self::MessageNew { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }

    /// Flat JSON payload for broadcasting.
    pub fn to_payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut payload = serde_json::json!({
            "type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        let data = serde_json::to_value(self)?;
        // Externally-tagged enum: single-entry map of variant name -> fields.
        if let serde_json::Value::Object(map) = data {
            for (_, fields) in map {
                if let serde_json::Value::Object(fields) = fields {
                    for (key, value) in fields {
                        payload[key] = value;
                    }
                }
            }
        }
        Ok(payload)
    }

    pub fn to_broadcast_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_payload_value()?)
    }
}

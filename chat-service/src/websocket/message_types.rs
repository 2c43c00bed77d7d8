//! Wire envelopes for the real-time channel.
//!
//! Every inbound frame is `{type, payload, request_id?}`; the server
//! answers `ack` or `error` correlated by `request_id`, and pushes
//! unsolicited broadcast frames built in [`super::events`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    pub group_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub parent_message_id: Option<Uuid>,
    #[serde(default)]
    pub client_dedupe_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentPayload {
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub file_size: i64,
}

#[derive(Debug, Deserialize)]
pub struct EditMessagePayload {
    pub message_id: Uuid,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessagePayload {
    pub message_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct TypingPayload {
    pub group_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PresencePayload {
    pub group_id: Uuid,
    pub status: String,
    #[serde(default)]
    pub device_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadPayload {
    pub group_id: Uuid,
    pub message_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ReactionPayload {
    pub message_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscribePayload {
    pub group_id: Uuid,
}

#[derive(Debug, Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    message_type: &'a str,
    payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
}

pub fn ack(request_id: Option<&str>, payload: Value) -> String {
    serde_json::to_string(&OutboundEnvelope {
        message_type: "ack",
        payload,
        request_id,
    })
    .unwrap_or_else(|_| r#"{"type":"ack"}"#.to_string())
}

pub fn error(request_id: Option<&str>, message: &str) -> String {
    serde_json::to_string(&OutboundEnvelope {
        message_type: "error",
        payload: serde_json::json!({ "message": message }),
        request_id,
    })
    .unwrap_or_else(|_| r#"{"type":"error"}"#.to_string())
}

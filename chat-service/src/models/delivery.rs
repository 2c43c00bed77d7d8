use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Expired,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Expired => "expired",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "delivered" => DeliveryStatus::Delivered,
            "failed" => DeliveryStatus::Failed,
            "expired" => DeliveryStatus::Expired,
            _ => DeliveryStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// Durable record of a message that could not be pushed to a recipient at
/// send time. Retried with backoff until delivered, exhausted, or expired.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryQueueEntry {
    pub id: Uuid,
    pub message_id: Uuid,
    pub recipient_id: Uuid,
    pub group_id: Uuid,
    pub status: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryQueueEntry {
    pub fn delivery_status(&self) -> DeliveryStatus {
        DeliveryStatus::from_db(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
            DeliveryStatus::Expired,
        ] {
            assert_eq!(DeliveryStatus::from_db(status.as_str()), status);
        }
    }

    #[test]
    fn only_pending_is_nonterminal() {
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Expired.is_terminal());
    }
}

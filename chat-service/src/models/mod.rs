pub mod delivery;
pub mod key;
pub mod message;

pub use delivery::{DeliveryQueueEntry, DeliveryStatus};
pub use key::{GrantStatus, GroupKey, KeyStatus, MemberKeyGrant};
pub use message::{Attachment, Message, MessageStatus, PinnedMessage, Reaction};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Membership role as reported by the group directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    pub fn from_db(value: &str) -> Self {
        match value {
            "owner" => MemberRole::Owner,
            "admin" => MemberRole::Admin,
            _ => MemberRole::Member,
        }
    }

    pub fn can_moderate(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "online" => PresenceStatus::Online,
            "away" => PresenceStatus::Away,
            _ => PresenceStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceState {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub status: PresenceStatus,
    pub device_type: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingState {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_moderation_rights() {
        assert!(MemberRole::Owner.can_moderate());
        assert!(MemberRole::Admin.can_moderate());
        assert!(!MemberRole::Member.can_moderate());
    }

    #[test]
    fn unknown_role_degrades_to_member() {
        assert_eq!(MemberRole::from_db("superuser"), MemberRole::Member);
    }
}

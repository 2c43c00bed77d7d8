use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Expired,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Expired => "expired",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "active" => KeyStatus::Active,
            _ => KeyStatus::Expired,
        }
    }
}

/// A group's content key, stored wrapped under the system master key.
#[derive(Debug, Clone)]
pub struct GroupKey {
    pub id: Uuid,
    pub group_id: Uuid,
    pub version: i32,
    pub wrapped_key: Vec<u8>,
    pub algorithm: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Active,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Revoked => "revoked",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "active" => GrantStatus::Active,
            _ => GrantStatus::Revoked,
        }
    }
}

/// A member's copy of a group key, wrapped under that member's derived
/// wrapping key.
#[derive(Debug, Clone)]
pub struct MemberKeyGrant {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub key_version: i32,
    pub wrapped_key_for_user: Vec<u8>,
    pub status: GrantStatus,
    pub distributed_at: DateTime<Utc>,
}

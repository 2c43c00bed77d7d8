//! Group membership directory, consumed through a narrow interface.
//!
//! Invites, joins, leaves and role changes are administered elsewhere;
//! this service only asks who is in a group and with what role.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::MemberRole;

#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn is_active_member(&self, group_id: Uuid, user_id: Uuid) -> AppResult<bool>;

    /// Role of an active member; `Authorization` error for non-members.
    async fn role(&self, group_id: Uuid, user_id: Uuid) -> AppResult<MemberRole>;

    /// All currently active member ids of a group.
    async fn active_members(&self, group_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Resolve a bare `@username` to the member's id, if that username
    /// belongs to an active member of the group.
    async fn resolve_username(&self, group_id: Uuid, username: &str) -> AppResult<Option<Uuid>>;
}

pub type SharedMembership = Arc<dyn MembershipDirectory>;

pub struct SqlMembershipDirectory {
    db: PgPool,
}

impl SqlMembershipDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MembershipDirectory for SqlMembershipDirectory {
    async fn is_active_member(&self, group_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2 AND is_active LIMIT 1",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.is_some())
    }

    async fn role(&self, group_id: Uuid, user_id: Uuid) -> AppResult<MemberRole> {
        let row = sqlx::query(
            "SELECT role FROM group_members WHERE group_id = $1 AND user_id = $2 AND is_active",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::Authorization)?;

        let role: String = row.get("role");
        Ok(MemberRole::from_db(&role))
    }

    async fn active_members(&self, group_id: Uuid) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT user_id FROM group_members WHERE group_id = $1 AND is_active",
        )
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("user_id")).collect())
    }

    async fn resolve_username(&self, group_id: Uuid, username: &str) -> AppResult<Option<Uuid>> {
        let row = sqlx::query(
            r#"
            SELECT u.id
            FROM users u
            JOIN group_members gm ON gm.user_id = u.id
            WHERE gm.group_id = $1 AND gm.is_active AND u.username = $2
            "#,
        )
        .bind(group_id)
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| r.get("id")))
    }
}

//! Durable best-effort delivery for members who were offline at send time.
//!
//! At-least-once with a finite horizon: bounded retries with backoff, a
//! 7-day expiry, and eventual purge of terminal rows. Guaranteed delivery
//! is explicitly not provided.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::DeliveryQueueEntry;

#[derive(Clone)]
pub struct OfflineDeliveryQueue {
    db: PgPool,
    expiry_days: i64,
    max_attempts: i32,
}

impl OfflineDeliveryQueue {
    pub fn new(db: PgPool, expiry_days: i64, max_attempts: i32) -> Self {
        Self {
            db,
            expiry_days,
            max_attempts,
        }
    }

    /// Queue a message for a recipient with no live connection.
    pub async fn enqueue(
        &self,
        message_id: Uuid,
        recipient_id: Uuid,
        group_id: Uuid,
    ) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        let expires_at = Utc::now() + ChronoDuration::days(self.expiry_days);
        sqlx::query(
            r#"
            INSERT INTO delivery_queue
                (id, message_id, recipient_id, group_id, status, max_attempts, next_retry_at, expires_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, NOW(), $6)
            "#,
        )
        .bind(id)
        .bind(message_id)
        .bind(recipient_id)
        .bind(group_id)
        .bind(self.max_attempts)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(id)
    }

    /// Pending entries that are due for a delivery attempt.
    pub async fn due_entries(&self, limit: i64) -> AppResult<Vec<DeliveryQueueEntry>> {
        let entries = sqlx::query_as::<_, DeliveryQueueEntry>(
            r#"
            SELECT id, message_id, recipient_id, group_id, status, attempt_count,
                   max_attempts, next_retry_at, expires_at, created_at
            FROM delivery_queue
            WHERE status = 'pending' AND next_retry_at <= NOW()
            ORDER BY next_retry_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(entries)
    }

    /// Every pending entry for one recipient, drained when they reconnect.
    pub async fn pending_for_recipient(
        &self,
        recipient_id: Uuid,
    ) -> AppResult<Vec<DeliveryQueueEntry>> {
        let entries = sqlx::query_as::<_, DeliveryQueueEntry>(
            r#"
            SELECT id, message_id, recipient_id, group_id, status, attempt_count,
                   max_attempts, next_retry_at, expires_at, created_at
            FROM delivery_queue
            WHERE recipient_id = $1 AND status = 'pending'
            ORDER BY created_at ASC
            "#,
        )
        .bind(recipient_id)
        .fetch_all(&self.db)
        .await?;
        Ok(entries)
    }

    pub async fn mark_delivered(&self, entry_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE delivery_queue SET status = 'delivered', updated_at = NOW() WHERE id = $1",
        )
        .bind(entry_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Record a failed attempt: backoff doubles per attempt, exhaustion
    /// flips the entry to `failed`.
    pub async fn mark_attempt_failed(&self, entry: &DeliveryQueueEntry) -> AppResult<()> {
        let attempts = entry.attempt_count + 1;
        let backoff_mins = 1i64 << attempts.min(8);
        let next_retry = Utc::now() + ChronoDuration::minutes(backoff_mins);
        sqlx::query(
            r#"
            UPDATE delivery_queue
            SET attempt_count = $2,
                next_retry_at = $3,
                status = CASE WHEN $2 >= max_attempts THEN 'failed' ELSE 'pending' END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(entry.id)
        .bind(attempts)
        .bind(next_retry)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Flip pending entries past their horizon to `expired`.
    pub async fn expire_overdue(&self) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE delivery_queue SET status = 'expired', updated_at = NOW() \
             WHERE status = 'pending' AND expires_at <= NOW()",
        )
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Physically remove terminal entries a full horizon past expiry.
    pub async fn purge_terminal(&self) -> AppResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(self.expiry_days);
        let result = sqlx::query(
            "DELETE FROM delivery_queue \
             WHERE status IN ('delivered', 'failed', 'expired') AND updated_at <= $1",
        )
        .bind(cutoff)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

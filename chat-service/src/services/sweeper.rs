//! Periodic maintenance: offline-delivery retries, queue expiry and purge,
//! and retention cleanup of soft-deleted messages.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use axum::extract::ws::Message as WsMessage;

use crate::error::AppResult;
use crate::models::DeliveryQueueEntry;
use crate::services::delivery_queue::OfflineDeliveryQueue;
use crate::websocket::events::ChatEvent;
use crate::websocket::ConnectionRegistry;

const RETRY_BATCH: i64 = 200;

#[derive(Clone)]
pub struct DeliverySweeper {
    db: PgPool,
    queue: OfflineDeliveryQueue,
    registry: ConnectionRegistry,
    retention_days: i64,
}

impl DeliverySweeper {
    pub fn new(
        db: PgPool,
        queue: OfflineDeliveryQueue,
        registry: ConnectionRegistry,
        retention_days: i64,
    ) -> Self {
        Self {
            db,
            queue,
            registry,
            retention_days,
        }
    }

    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "delivery sweep failed");
                }
            }
        })
    }

    pub async fn run_once(&self) -> AppResult<()> {
        let expired = self.queue.expire_overdue().await?;
        if expired > 0 {
            info!(expired, "expired overdue delivery entries");
        }

        for entry in self.queue.due_entries(RETRY_BATCH).await? {
            if self.try_deliver(&entry).await? {
                self.queue.mark_delivered(entry.id).await?;
            } else {
                self.queue.mark_attempt_failed(&entry).await?;
            }
        }

        let purged = self.queue.purge_terminal().await?;
        if purged > 0 {
            debug!(purged, "purged terminal delivery entries");
        }

        self.purge_soft_deleted().await?;
        Ok(())
    }

    /// Drain every pending entry for a recipient who just reconnected.
    pub async fn flush_recipient(&self, user_id: Uuid) -> AppResult<()> {
        for entry in self.queue.pending_for_recipient(user_id).await? {
            if self.try_deliver(&entry).await? {
                self.queue.mark_delivered(entry.id).await?;
            }
        }
        Ok(())
    }

    /// Push the queued message's metadata to the recipient's live session.
    /// Delivery needs a connection on this instance; anything else waits
    /// for the next retry.
    async fn try_deliver(&self, entry: &DeliveryQueueEntry) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT sender_id, sequence_number, thread_root_id, is_deleted \
             FROM messages WHERE id = $1",
        )
        .bind(entry.message_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            // Message purged since enqueueing; nothing left to deliver.
            return Ok(true);
        };
        if row.get::<bool, _>("is_deleted") {
            return Ok(true);
        }

        let event = ChatEvent::MessageNew {
            group_id: entry.group_id,
            message_id: entry.message_id,
            sender_id: row.get("sender_id"),
            sequence_number: row.get("sequence_number"),
            thread_root_id: row.get("thread_root_id"),
        };
        let payload = match event.to_broadcast_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize queued event");
                return Ok(false);
            }
        };

        Ok(self
            .registry
            .send_to_user(entry.recipient_id, WsMessage::Text(payload))
            .await)
    }

    /// Retention policy: soft-deleted messages past the horizon are the
    /// only rows ever physically removed.
    async fn purge_soft_deleted(&self) -> AppResult<()> {
        let cutoff = Utc::now() - ChronoDuration::days(self.retention_days);
        let result = sqlx::query(
            "DELETE FROM messages WHERE is_deleted = TRUE AND deleted_at <= $1",
        )
        .bind(cutoff)
        .execute(&self.db)
        .await?;
        if result.rows_affected() > 0 {
            info!(purged = result.rows_affected(), "retention purge of deleted messages");
        }
        Ok(())
    }
}

//! Fan-out of chat events to live sessions, with the offline queue as the
//! durability backstop for new messages.
//!
//! Write paths publish domain events into an explicit channel; a single
//! worker owns delivery. Per-recipient failures are logged and swallowed —
//! they must never fail the originating write.

use axum::extract::ws::Message;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::PresenceStatus;
use crate::services::delivery_queue::OfflineDeliveryQueue;
use crate::services::membership::SharedMembership;
use crate::services::presence::PresenceTracker;
use crate::websocket::events::ChatEvent;
use crate::websocket::ConnectionRegistry;

/// Cloneable handle the write paths publish through.
#[derive(Clone)]
pub struct EventPublisher {
    tx: UnboundedSender<ChatEvent>,
}

impl EventPublisher {
    pub fn channel() -> (Self, UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hand an event to the broadcast worker. Infallible from the caller's
    /// perspective: a closed channel is logged, not surfaced.
    pub fn publish(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            warn!("broadcast channel closed; event dropped");
        }
    }
}

pub struct DeliveryBroadcaster {
    registry: ConnectionRegistry,
    membership: SharedMembership,
    presence: PresenceTracker,
    queue: OfflineDeliveryQueue,
}

impl DeliveryBroadcaster {
    pub fn new(
        registry: ConnectionRegistry,
        membership: SharedMembership,
        presence: PresenceTracker,
        queue: OfflineDeliveryQueue,
    ) -> Self {
        Self {
            registry,
            membership,
            presence,
            queue,
        }
    }

    /// Consume the event channel until every publisher is gone.
    pub fn spawn(self, mut rx: UnboundedReceiver<ChatEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.dispatch(event).await;
            }
            debug!("broadcast worker stopped");
        })
    }

    async fn dispatch(&self, event: ChatEvent) {
        let group_id = event.group_id();
        let actor = event.actor();

        let payload = match event.to_broadcast_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, event = event.event_type(), "failed to serialize event");
                return;
            }
        };

        let members = match self.membership.active_members(group_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, %group_id, "failed to enumerate members for fan-out");
                return;
            }
        };

        for member in members {
            if member == actor {
                continue;
            }

            if self
                .registry
                .send_to_user(member, Message::Text(payload.clone()))
                .await
            {
                continue;
            }

            // Not reachable from this instance. Only new messages earn a
            // durable queue entry, and only when the member has no fresh
            // "online" presence (which would mean another instance holds
            // their socket).
            let Some(message_id) = event.queued_when_offline() else {
                continue;
            };

            let online_elsewhere = matches!(
                self.presence.live_status(group_id, member).await,
                Ok(PresenceStatus::Online)
            );
            if online_elsewhere {
                continue;
            }

            if let Err(e) = self.queue.enqueue(message_id, member, group_id).await {
                warn!(error = %e, %member, %message_id, "failed to enqueue offline delivery");
            }
        }
    }
}

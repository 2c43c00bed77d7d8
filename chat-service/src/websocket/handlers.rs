//! The chat channel: one authenticated socket per user, multiplexing
//! broadcast fan-out against inbound envelopes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::middleware::auth::verify_ws_token;
use crate::models::PresenceStatus;
use crate::services::message_store::{AttachmentInput, SendMessageInput};
use crate::services::rate_limit::Operation;
use crate::state::AppState;
use crate::websocket::message_types::{
    ack, error as error_frame, DeleteMessagePayload, EditMessagePayload, InboundEnvelope,
    MarkReadPayload, PresencePayload, ReactionPayload, SendMessagePayload, SubscribePayload,
    TypingPayload,
};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let ctx = match verify_ws_token(&state, params.token.as_deref(), &headers).await {
        Ok(ctx) => ctx,
        Err(_) => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(state, ctx, socket))
}

async fn handle_socket(state: AppState, ctx: AuthContext, socket: WebSocket) {
    let user_id = ctx.user_id;
    let session_id = ctx.session_id;

    // Register before draining the offline queue so nothing published in
    // between is lost: new events land in rx, the queue covers the past.
    let mut rx = state.registry.register(user_id, session_id).await;

    if let Err(e) = state.sweeper.flush_recipient(user_id).await {
        warn!(error = %e, %user_id, "failed to drain offline queue on connect");
    }

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        let closing = matches!(msg, Message::Close(_));
                        if sender.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                    // Registry dropped our sender (replaced by a newer
                    // session).
                    None => break,
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &ctx, &text).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, %user_id, "socket read error");
                        break;
                    }
                }
            }
        }
    }

    // Disconnect cleanup: the user leaves the registry and every
    // subscription, and presence downgrades to offline wherever they were
    // visible. In-flight persistence is never cancelled. A session that was
    // replaced by a reconnect must not downgrade the new session's presence.
    let groups = state.registry.subscriptions_of(user_id).await;
    let went_offline = state.registry.unregister(user_id, session_id).await;
    if went_offline {
        for group_id in groups {
            if let Err(e) = state
                .presence
                .update_presence(group_id, user_id, PresenceStatus::Offline, None)
                .await
            {
                warn!(error = %e, %user_id, %group_id, "failed to downgrade presence on disconnect");
            }
        }
    }
}

/// Process one inbound envelope; replies route back through the registry
/// so the socket loop stays the single writer.
async fn handle_frame(state: &AppState, ctx: &AuthContext, text: &str) {
    let envelope: InboundEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(_) => {
            reply(state, ctx, error_frame(None, "malformed envelope")).await;
            return;
        }
    };
    let request_id = envelope.request_id.clone();

    let result = dispatch(state, ctx, &envelope).await;
    let frame = match result {
        Ok(payload) => ack(request_id.as_deref(), payload),
        Err(e) => error_frame(request_id.as_deref(), &e.to_string()),
    };
    reply(state, ctx, frame).await;
}

async fn reply(state: &AppState, ctx: &AuthContext, frame: String) {
    state
        .registry
        .send_to_user(ctx.user_id, Message::Text(frame))
        .await;
}

async fn dispatch(
    state: &AppState,
    ctx: &AuthContext,
    envelope: &InboundEnvelope,
) -> Result<serde_json::Value, AppError> {
    let payload = envelope.payload.clone();
    let user_id = ctx.user_id;

    match envelope.message_type.as_str() {
        "message.send" => {
            let p: SendMessagePayload = parse(payload)?;
            let message = state
                .messages
                .send_message(SendMessageInput {
                    group_id: p.group_id,
                    sender_id: user_id,
                    content: p.content,
                    content_type: p.content_type,
                    parent_message_id: p.parent_message_id,
                    client_dedupe_id: p.client_dedupe_id,
                    attachments: p
                        .attachments
                        .into_iter()
                        .map(|a| AttachmentInput {
                            file_name: a.file_name,
                            content_type: a.content_type,
                            file_size: a.file_size,
                        })
                        .collect(),
                })
                .await?;
            Ok(serde_json::json!({
                "message_id": message.id,
                "sequence_number": message.sequence_number,
                "thread_root_id": message.thread_root_id,
            }))
        }

        "message.edit" => {
            let p: EditMessagePayload = parse(payload)?;
            let message = state
                .messages
                .edit_message(p.message_id, user_id, &p.content)
                .await?;
            Ok(serde_json::json!({"message_id": message.id}))
        }

        "message.delete" => {
            let p: DeleteMessagePayload = parse(payload)?;
            state.messages.delete_message(p.message_id, user_id).await?;
            Ok(serde_json::json!({"message_id": p.message_id}))
        }

        "typing.start" | "typing.stop" => {
            let p: TypingPayload = parse(payload)?;
            require_member(state, p.group_id, user_id).await?;
            state
                .rate_limiter
                .check(user_id, p.group_id, Operation::TypingUpdate)
                .await?;
            let is_typing = envelope.message_type == "typing.start";
            state.typing.set_typing(p.group_id, user_id, is_typing).await?;
            Ok(serde_json::json!({"group_id": p.group_id}))
        }

        "presence.update" => {
            let p: PresencePayload = parse(payload)?;
            require_member(state, p.group_id, user_id).await?;
            state
                .presence
                .update_presence(
                    p.group_id,
                    user_id,
                    PresenceStatus::from_db(&p.status),
                    p.device_type,
                )
                .await?;
            Ok(serde_json::json!({"group_id": p.group_id}))
        }

        "read.mark" => {
            let p: MarkReadPayload = parse(payload)?;
            let marked = state
                .messages
                .mark_as_read(p.group_id, user_id, p.message_id)
                .await?;
            Ok(serde_json::json!({"marked_count": marked}))
        }

        "reaction.add" => {
            let p: ReactionPayload = parse(payload)?;
            state
                .messages
                .add_reaction(p.message_id, user_id, &p.emoji)
                .await?;
            Ok(serde_json::json!({"message_id": p.message_id}))
        }

        "reaction.remove" => {
            let p: ReactionPayload = parse(payload)?;
            state
                .messages
                .remove_reaction(p.message_id, user_id, &p.emoji)
                .await?;
            Ok(serde_json::json!({"message_id": p.message_id}))
        }

        "group.join" => {
            let p: SubscribePayload = parse(payload)?;
            require_member(state, p.group_id, user_id).await?;
            state.registry.subscribe(user_id, p.group_id).await;
            Ok(serde_json::json!({"group_id": p.group_id}))
        }

        "group.leave" => {
            let p: SubscribePayload = parse(payload)?;
            state.registry.unsubscribe(user_id, p.group_id).await;
            Ok(serde_json::json!({"group_id": p.group_id}))
        }

        other => Err(AppError::Validation(format!("unknown message type: {other}"))),
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(payload).map_err(|e| AppError::Validation(format!("bad payload: {e}")))
}

async fn require_member(
    state: &AppState,
    group_id: uuid::Uuid,
    user_id: uuid::Uuid,
) -> Result<(), AppError> {
    if !state.membership.is_active_member(group_id, user_id).await? {
        return Err(AppError::Authorization);
    }
    Ok(())
}

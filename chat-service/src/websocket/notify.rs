//! The second real-time channel: out-of-chat notifications (invites,
//! votes, insights). Outbound-only from the client's point of view; frames
//! use the same `{type, payload}` envelope as the chat channel.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};

use crate::middleware::auth::verify_ws_token;
use crate::state::AppState;
use crate::websocket::handlers::WsParams;

pub async fn notify_ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let ctx = match verify_ws_token(&state, params.token.as_deref(), &headers).await {
        Ok(ctx) => ctx,
        Err(_) => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(state, ctx.user_id, ctx.session_id, socket))
}

async fn handle_socket(
    state: AppState,
    user_id: uuid::Uuid,
    session_id: uuid::Uuid,
    socket: WebSocket,
) {
    let mut rx = state.notify_registry.register(user_id, session_id).await;
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
                    None => break,
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    // Clients do not speak on this channel.
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.notify_registry.unregister(user_id, session_id).await;
}

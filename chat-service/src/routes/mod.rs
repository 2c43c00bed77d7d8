use crate::state::AppState;
use axum::middleware;
use axum::{
    routing::{delete, get, post, put},
    Router,
};

pub mod keys;
pub mod messages;
pub mod pins;
pub mod presence;
pub mod reactions;
pub mod receipts;

use keys::{distribute_key, grant_status, revoke_access, rotate_key};
use messages::{
    delete_message, get_attachments, get_message, get_messages, send_message, update_message,
};
use pins::{list_pinned, pin_message, unpin_message};
use presence::{presence_snapshot, set_typing, typing_snapshot, update_presence};
use reactions::{add_reaction, get_reactions, remove_reaction};
use receipts::{get_unread_count, mark_as_read};

use crate::websocket::handlers::ws_handler;
use crate::websocket::notify::notify_ws_handler;

pub fn build_router(state: AppState) -> Router<AppState> {
    let introspection = Router::new().route("/health", get(|| async { "OK" }));

    // WebSocket upgrades authenticate in-handler (browsers cannot attach
    // an Authorization header to the upgrade request).
    let realtime = Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/notifications", get(notify_ws_handler));

    // Synchronous parity surface; no server-side content search — content
    // is ciphertext at rest, clients search after decryption.
    let api_v1 = Router::new()
        // Messages
        .route("/groups/:id/messages", post(send_message))
        .route("/groups/:id/messages", get(get_messages))
        .route("/messages/:id", get(get_message))
        .route("/messages/:id", put(update_message))
        .route("/messages/:id", delete(delete_message))
        .route("/messages/:id/attachments", get(get_attachments))
        // Reactions
        .route("/messages/:id/reactions", post(add_reaction))
        .route("/messages/:id/reactions", get(get_reactions))
        .route("/messages/:id/reactions/:emoji", delete(remove_reaction))
        // Read receipts
        .route("/groups/:id/read", post(mark_as_read))
        .route("/groups/:id/unread-count", get(get_unread_count))
        // Typing / presence snapshots and updates
        .route("/groups/:id/typing", get(typing_snapshot))
        .route("/groups/:id/typing", put(set_typing))
        .route("/groups/:id/presence", get(presence_snapshot))
        .route("/groups/:id/presence", put(update_presence))
        // Pins
        .route("/groups/:id/pins", post(pin_message))
        .route("/groups/:id/pins", get(list_pinned))
        .route("/groups/:id/pins/:message_id", delete(unpin_message))
        // Key administration
        .route("/groups/:id/keys/rotate", post(rotate_key))
        .route("/groups/:id/keys/distribute", post(distribute_key))
        .route("/groups/:id/keys/revoke", post(revoke_access))
        .route("/groups/:id/keys/grant", get(grant_status));

    let secured_api_v1 = api_v1.layer(middleware::from_fn_with_state(
        state,
        crate::middleware::auth::auth_middleware,
    ));

    let router = introspection
        .merge(realtime)
        .merge(Router::new().nest("/api/v1", secured_api_v1));

    crate::middleware::with_defaults(router)
}

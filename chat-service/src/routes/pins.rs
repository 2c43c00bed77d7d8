use crate::{auth::AuthContext, error::AppError, models::PinnedMessage, state::AppState};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct PinBody {
    pub message_id: Uuid,
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /groups/{id}/pins (admin/owner only)
pub async fn pin_message(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<PinBody>,
) -> Result<StatusCode, AppError> {
    state
        .messages
        .pin_message(group_id, body.message_id, ctx.user_id, body.note)
        .await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /groups/{id}/pins/{message_id} (admin/owner only)
pub async fn unpin_message(
    State(state): State<AppState>,
    Path((group_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    state
        .messages
        .unpin_message(group_id, message_id, ctx.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /groups/{id}/pins — ordered by pin_order.
pub async fn list_pinned(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<PinnedMessage>>, AppError> {
    let pins = state.messages.list_pinned(group_id, ctx.user_id).await?;
    Ok(Json(pins))
}

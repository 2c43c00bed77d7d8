use crate::{auth::AuthContext, error::AppError, state::AppState};
use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct MarkReadBody {
    pub message_id: Uuid,
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub marked_count: i64,
}

/// POST /groups/{id}/read — receipts for everything up to and including
/// the target message.
pub async fn mark_as_read(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<MarkReadBody>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let marked_count = state
        .messages
        .mark_as_read(group_id, ctx.user_id, body.message_id)
        .await?;
    Ok(Json(MarkReadResponse { marked_count }))
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub group_id: Uuid,
    pub unread_count: i64,
}

/// GET /groups/{id}/unread-count
pub async fn get_unread_count(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<UnreadCountResponse>, AppError> {
    let unread_count = state
        .messages
        .get_unread_count(group_id, ctx.user_id)
        .await?;
    Ok(Json(UnreadCountResponse {
        group_id,
        unread_count,
    }))
}

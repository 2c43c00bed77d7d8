use crate::{
    auth::AuthContext,
    error::AppError,
    services::message_store::ReactionSummary,
    state::AppState,
};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct AddReactionBody {
    pub emoji: String,
}

#[derive(Serialize)]
pub struct ReactionsResponse {
    pub message_id: Uuid,
    pub reactions: Vec<ReactionSummary>,
}

/// POST /messages/{id}/reactions
pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<AddReactionBody>,
) -> Result<StatusCode, AppError> {
    state
        .messages
        .add_reaction(message_id, ctx.user_id, &body.emoji)
        .await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /messages/{id}/reactions/{emoji}
pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((message_id, emoji)): Path<(Uuid, String)>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    state
        .messages
        .remove_reaction(message_id, ctx.user_id, &emoji)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /messages/{id}/reactions
pub async fn get_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ReactionsResponse>, AppError> {
    let reactions = state
        .messages
        .get_message_reactions(message_id, ctx.user_id)
        .await?;
    Ok(Json(ReactionsResponse {
        message_id,
        reactions,
    }))
}

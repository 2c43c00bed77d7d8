use crate::{
    auth::AuthContext,
    error::AppError,
    models::{PresenceState, PresenceStatus, TypingState},
    state::AppState,
};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

async fn require_member(state: &AppState, group_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
    if !state.membership.is_active_member(group_id, user_id).await? {
        return Err(AppError::Authorization);
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct SetTypingBody {
    pub is_typing: bool,
}

/// PUT /groups/{id}/typing
pub async fn set_typing(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<SetTypingBody>,
) -> Result<StatusCode, AppError> {
    require_member(&state, group_id, ctx.user_id).await?;
    state
        .rate_limiter
        .check(
            ctx.user_id,
            group_id,
            crate::services::rate_limit::Operation::TypingUpdate,
        )
        .await?;
    state
        .typing
        .set_typing(group_id, ctx.user_id, body.is_typing)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /groups/{id}/typing
pub async fn typing_snapshot(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<TypingState>>, AppError> {
    require_member(&state, group_id, ctx.user_id).await?;
    Ok(Json(state.typing.snapshot(group_id).await?))
}

#[derive(Deserialize)]
pub struct UpdatePresenceBody {
    pub status: String,
    #[serde(default)]
    pub device_type: Option<String>,
}

/// PUT /groups/{id}/presence
pub async fn update_presence(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<UpdatePresenceBody>,
) -> Result<StatusCode, AppError> {
    require_member(&state, group_id, ctx.user_id).await?;
    state
        .presence
        .update_presence(
            group_id,
            ctx.user_id,
            PresenceStatus::from_db(&body.status),
            body.device_type,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /groups/{id}/presence
pub async fn presence_snapshot(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<PresenceState>>, AppError> {
    require_member(&state, group_id, ctx.user_id).await?;
    Ok(Json(state.presence.snapshot(group_id).await?))
}

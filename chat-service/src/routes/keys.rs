//! Key administration. Rotation and grant management run when membership
//! changes; the membership admin service calls these on join/leave.

use crate::{auth::AuthContext, error::AppError, state::AppState};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

async fn require_moderator(
    state: &AppState,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    let role = state.membership.role(group_id, user_id).await?;
    if !role.can_moderate() {
        return Err(AppError::Authorization);
    }
    Ok(())
}

#[derive(Serialize)]
pub struct RotateResponse {
    pub key_id: Uuid,
}

/// POST /groups/{id}/keys/rotate (admin/owner only)
pub async fn rotate_key(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<RotateResponse>, AppError> {
    require_moderator(&state, group_id, ctx.user_id).await?;
    let key_id = state.key_vault.rotate_group_key(group_id).await?;
    Ok(Json(RotateResponse { key_id }))
}

#[derive(Deserialize)]
pub struct DistributeBody {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct DistributeResponse {
    pub grant_id: Uuid,
}

/// POST /groups/{id}/keys/distribute — grant the current key to a member
/// who just joined (admin/owner only).
pub async fn distribute_key(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<DistributeBody>,
) -> Result<(StatusCode, Json<DistributeResponse>), AppError> {
    require_moderator(&state, group_id, ctx.user_id).await?;
    if !state
        .membership
        .is_active_member(group_id, body.user_id)
        .await?
    {
        return Err(AppError::Validation("user is not an active member".into()));
    }

    let key = state.key_vault.active_key(group_id).await?;
    let grant_id = state
        .key_vault
        .distribute_key_to_member(group_id, body.user_id, key.key_id, None)
        .await?;
    Ok((StatusCode::CREATED, Json(DistributeResponse { grant_id })))
}

#[derive(Deserialize)]
pub struct RevokeBody {
    pub user_id: Uuid,
}

/// POST /groups/{id}/keys/revoke — called when a member leaves or is
/// removed (admin/owner only). The caller is expected to rotate afterwards
/// so future messages use a key the departed member never held.
pub async fn revoke_access(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<RevokeBody>,
) -> Result<StatusCode, AppError> {
    require_moderator(&state, group_id, ctx.user_id).await?;
    state
        .key_vault
        .revoke_user_access(group_id, body.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct GrantStatusResponse {
    pub key_version: Option<i32>,
    pub status: Option<crate::models::GrantStatus>,
}

/// GET /groups/{id}/keys/grant — the caller's own grant state. The wrapped
/// key itself never leaves the vault.
pub async fn grant_status(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<GrantStatusResponse>, AppError> {
    let grant = state.key_vault.grant_status(group_id, ctx.user_id).await?;
    Ok(Json(match grant {
        Some(grant) => GrantStatusResponse {
            key_version: Some(grant.key_version),
            status: Some(grant.status),
        },
        None => GrantStatusResponse {
            key_version: None,
            status: None,
        },
    }))
}

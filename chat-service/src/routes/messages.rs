use crate::{
    auth::AuthContext,
    error::AppError,
    services::message_store::{
        AttachmentInput, GetMessagesOptions, MessagePage, MessageView, SendMessageInput,
    },
    state::AppState,
};
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct AttachmentBody {
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub file_size: i64,
}

#[derive(Deserialize)]
pub struct SendMessageBody {
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub parent_message_id: Option<Uuid>,
    #[serde(default)]
    pub client_dedupe_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentBody>,
}

/// POST /groups/{id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<MessageView>), AppError> {
    let message = state
        .messages
        .send_message(SendMessageInput {
            group_id,
            sender_id: ctx.user_id,
            content: body.content,
            content_type: body.content_type,
            parent_message_id: body.parent_message_id,
            client_dedupe_id: body.client_dedupe_id,
            attachments: body
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
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Deserialize)]
pub struct GetMessagesQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub before: Option<Uuid>,
    #[serde(default)]
    pub after: Option<Uuid>,
    #[serde(default)]
    pub thread_root_id: Option<Uuid>,
    #[serde(default)]
    pub include_deleted: bool,
}

/// GET /groups/{id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<GetMessagesQuery>,
) -> Result<Json<MessagePage>, AppError> {
    let page = state
        .messages
        .get_messages(
            group_id,
            ctx.user_id,
            GetMessagesOptions {
                limit: query.limit,
                before: query.before,
                after: query.after,
                thread_root_id: query.thread_root_id,
                include_deleted: query.include_deleted,
            },
        )
        .await?;
    Ok(Json(page))
}

/// GET /messages/{id}
pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<MessageView>, AppError> {
    let message = state.messages.get_message(message_id, ctx.user_id).await?;
    Ok(Json(message))
}

#[derive(Deserialize)]
pub struct UpdateMessageBody {
    pub content: String,
}

/// PUT /messages/{id}
pub async fn update_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<UpdateMessageBody>,
) -> Result<Json<MessageView>, AppError> {
    let message = state
        .messages
        .edit_message(message_id, ctx.user_id, &body.content)
        .await?;
    Ok(Json(message))
}

/// DELETE /messages/{id}
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    state.messages.delete_message(message_id, ctx.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /messages/{id}/attachments
pub async fn get_attachments(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<crate::models::Attachment>>, AppError> {
    let attachments = state
        .messages
        .list_attachments(message_id, ctx.user_id)
        .await?;
    Ok(Json(attachments))
}

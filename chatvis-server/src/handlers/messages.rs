use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use shared::models::{ChatMessage, CreateMessageRequest, NewMessage, UpdateMessageRequest};
use tracing::{debug, instrument};

use crate::{
    app_state::AppState,
    auth::AuthenticatedUser,
    http::error::{ApiError, AppResult},
    services::ServiceError,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/messages", post(create_message))
        .route("/api/messages/group/{key}", get(list_group_messages))
        .route("/api/messages/{id}", get(get_message).put(update_message))
}

fn validate_content(content: &str) -> AppResult<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("content must not be empty"));
    }
    Ok(trimmed)
}

#[instrument(skip(state, user), fields(user_id = user.id))]
async fn list_group_messages(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let group = state.groups()?.require_member(user.id, &key).await?;
    let messages = state.message_rows()?.list_by_group(group.id).await?;
    Ok(Json(
        messages
            .iter()
            .map(|message| message.to_chat_message(&group.key))
            .collect(),
    ))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
async fn get_message(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ChatMessage>> {
    let message = state.message_rows()?.get(id).await?;
    let groups = state.groups()?;
    if !groups.is_member(user.id, message.group_id).await? {
        // Do not reveal messages of foreign groups.
        return Err(ApiError::not_found(format!("message {id}")));
    }
    let group = groups.get(message.group_id).await?;
    Ok(Json(message.to_chat_message(&group.key)))
}

/// Persist a message and broadcast the stored copy through the hub.
#[instrument(skip(state, user, payload), fields(user_id = user.id, group = %payload.group_id))]
async fn create_message(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateMessageRequest>,
) -> AppResult<impl IntoResponse> {
    let content = validate_content(&payload.content)?.to_string();
    let group = state
        .groups()?
        .require_member(user.id, &payload.group_id)
        .await?;

    let stored = state
        .message_store()?
        .append(NewMessage {
            group_id: group.id,
            sender_id: user.id,
            content,
            answer_id: payload.answer_id,
        })
        .await?;

    let message = stored.to_chat_message(&group.key);
    let report = state.hub.broadcast(&message);
    debug!(message_id = stored.id, delivered = report.delivered, "message broadcast");

    Ok((StatusCode::CREATED, Json(message)))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
async fn update_message(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateMessageRequest>,
) -> AppResult<Json<ChatMessage>> {
    let content = validate_content(&payload.content)?;
    let rows = state.message_rows()?;
    let existing = rows.get(id).await?;
    if existing.sender_id != user.id {
        return Err(ServiceError::Forbidden(format!("message {id} belongs to another user")).into());
    }
    let updated = rows.update_content(id, user.id, content).await?;
    let group = state.groups()?.get(updated.group_id).await?;
    Ok(Json(updated.to_chat_message(&group.key)))
}

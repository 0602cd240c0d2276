use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use shared::models::{AddMembersRequest, CreateGroupRequest, Group, JoinGroupRequest, User};
use tracing::{debug, instrument, warn};

use crate::{app_state::AppState, auth::AuthenticatedUser, http::error::AppResult};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/groups", post(create_group).get(list_groups))
        .route("/api/groups/join", post(join_group))
        .route("/api/groups/{key}", get(get_group))
        .route("/api/groups/{key}/members", get(list_members).post(add_members))
}

/// Rebuild `user_id`'s hub membership from the directory after a membership change.
///
/// Failures are logged only; the user picks up the change on their next connect.
pub(crate) async fn refresh_membership(state: &AppState, user_id: i64) {
    let directory = match state.group_directory() {
        Ok(directory) => directory,
        Err(err) => {
            debug!(user_id, error = %err, "no group directory; hub membership not refreshed");
            return;
        }
    };
    match directory.groups_for_user(user_id).await {
        Ok(groups) => state.hub.subscribe_to_groups(user_id, groups),
        Err(err) => warn!(user_id, error = %err, "failed to refresh hub membership"),
    }
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
async fn create_group(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateGroupRequest>,
) -> AppResult<impl IntoResponse> {
    let group = state.groups()?.create(user.id, &payload.name).await?;
    refresh_membership(&state, user.id).await;
    Ok((StatusCode::CREATED, Json(group)))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
async fn list_groups(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<Group>>> {
    Ok(Json(state.groups()?.for_member(user.id).await?))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
async fn get_group(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
) -> AppResult<Json<Group>> {
    Ok(Json(state.groups()?.require_member(user.id, &key).await?))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
async fn list_members(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
) -> AppResult<Json<Vec<User>>> {
    let groups = state.groups()?;
    let group = groups.require_member(user.id, &key).await?;
    Ok(Json(groups.members(group.id).await?))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
async fn join_group(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<JoinGroupRequest>,
) -> AppResult<Json<Group>> {
    let group = state.groups()?.join(user.id, payload.key.trim()).await?;
    refresh_membership(&state, user.id).await;
    Ok(Json(group))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
async fn add_members(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
    Json(payload): Json<AddMembersRequest>,
) -> AppResult<impl IntoResponse> {
    let groups = state.groups()?;
    let group = groups.require_member(user.id, &key).await?;
    let added = groups.add_members(group.id, &payload.user_ids).await?;
    for user_id in &added {
        refresh_membership(&state, *user_id).await;
    }
    Ok((StatusCode::CREATED, Json(json!({ "added": added }))))
}

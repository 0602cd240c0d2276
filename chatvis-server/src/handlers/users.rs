use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;
use shared::models::User;
use tracing::instrument;

use crate::{app_state::AppState, auth::AuthenticatedUser, http::error::AppResult};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users/me", get(me))
        .route("/api/users/by-email", get(by_email))
        .route("/api/users/{id}", get(by_id))
}

#[derive(Debug, Deserialize)]
struct EmailQuery {
    email: String,
}

#[instrument(skip(state, user), fields(user_id = user.id))]
async fn me(State(state): State<Arc<AppState>>, user: AuthenticatedUser) -> AppResult<Json<User>> {
    Ok(Json(state.users()?.get(user.id).await?))
}

#[instrument(skip(state, _user))]
async fn by_id(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> AppResult<Json<User>> {
    Ok(Json(state.users()?.get(id).await?))
}

#[instrument(skip(state, _user, query))]
async fn by_email(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Query(query): Query<EmailQuery>,
) -> AppResult<Json<User>> {
    Ok(Json(state.users()?.find_by_email(&query.email).await?))
}

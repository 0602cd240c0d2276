use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use shared::models::{LoginRequest, LoginResponse, RegisterRequest};
use tracing::{info, instrument};

use crate::{app_state::AppState, auth::AuthenticatedUser, http::error::AppResult};

/// `/api/public/register` and `/api/public/login`.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/public/register", post(register))
        .route("/api/public/login", post(login))
}

/// `/api/auth/logout`; mounted behind the bearer middleware.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/auth/logout", post(logout))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let user = state.users()?.register(payload).await?;
    info!(user_id = user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let users = state.users()?;
    let user = users.authenticate(&payload.email, &payload.password).await?;
    let token = state.tokens.issue(&user)?;
    users.store_token(user.id, &token).await?;
    Ok(Json(LoginResponse { token, user }))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
async fn logout(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    state.users()?.clear_token(user.id).await?;
    state.hub.unregister(user.id);
    Ok(StatusCode::NO_CONTENT)
}

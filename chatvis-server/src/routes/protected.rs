use std::sync::Arc;

use axum::{Router, middleware::from_fn_with_state};
use tracing::info;

use crate::{
    app_state::AppState,
    handlers::{auth, groups, messages, users},
    middleware::auth::require_bearer,
};

/// Routes behind `Authorization: Bearer`.
pub fn create_router_protected(state: Arc<AppState>) -> Router<Arc<AppState>> {
    info!("Creating protected router");
    Router::new()
        .merge(auth::protected_routes())
        .merge(users::routes())
        .merge(groups::routes())
        .merge(messages::routes())
        .route_layer(from_fn_with_state(state, require_bearer))
}

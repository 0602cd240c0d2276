use std::sync::Arc;

use axum::Router;
use tracing::info;

use crate::{
    app_state::AppState,
    handlers::{auth, ws},
};

/// Routes reachable without a bearer token: registration, login and the chat socket,
/// which authenticates through its first frame instead.
pub fn create_router_public() -> Router<Arc<AppState>> {
    info!("Creating public router");
    Router::new()
        .merge(auth::public_routes())
        .merge(ws::routes())
}

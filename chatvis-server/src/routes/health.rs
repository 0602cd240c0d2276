use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use metrics::counter;
use serde::Serialize;
use tracing::warn;

use crate::{app_state::AppState, db::bootstrap};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Live chat sockets registered in the hub.
    connections: usize,
}

fn respond(
    state: &AppState,
    endpoint: &'static str,
    code: StatusCode,
    status: &'static str,
) -> (StatusCode, Json<HealthResponse>) {
    let outcome = if code.is_success() { "ok" } else { "error" };
    counter!("health_checks_total", "endpoint" => endpoint, "status" => outcome).increment(1);
    (
        code,
        Json(HealthResponse {
            status,
            connections: state.hub.connection_count(),
        }),
    )
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    respond(&state, "healthz", StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(pool) = state.pool.as_ref() else {
        return respond(&state, "readyz", StatusCode::SERVICE_UNAVAILABLE, "no_db");
    };
    match bootstrap::ensure_readiness(pool).await {
        Ok(()) => respond(&state, "readyz", StatusCode::OK, "ready"),
        Err(err) => {
            warn!(error = %err, "readiness probe failed");
            respond(&state, "readyz", StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    }
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

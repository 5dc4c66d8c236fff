//! Liveness endpoint.
//!
//! Answers `503` once the pipeline has started draining so that a local
//! supervisor stops routing producers to this agent.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` while accepting records, `draining` after shutdown began.
    pub status: &'static str,
    /// Always `sieve-agent`.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
}

/// Creates the liveness route.
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = if state.pipeline().is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "healthy")
    };
    let body = HealthResponse {
        status,
        service: "sieve-agent",
        version: env!("CARGO_PKG_VERSION"),
    };
    (code, Json(body))
}

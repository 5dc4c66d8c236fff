//! Pipeline statistics endpoint.

use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use pipeline::PipelineStats;

/// Creates the statistics routes.
pub fn stats_routes(state: AppState) -> Router {
    Router::new()
        .route("/stats", get(pipeline_stats))
        .with_state(state)
}

/// Returns a snapshot of the pipeline counters.
async fn pipeline_stats(State(state): State<AppState>) -> Json<PipelineStats> {
    Json(state.pipeline().stats())
}

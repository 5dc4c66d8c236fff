//! HTTP route definitions.
//!
//! The agent exposes a health check, a statistics snapshot and push
//! ingestion for metrics, logs and traces.

mod health;
mod ingest;
mod stats;

pub use health::health_routes;
pub use ingest::{ingest_routes, IngestError, IngestRequest, IngestResponse};
pub use stats::stats_routes;

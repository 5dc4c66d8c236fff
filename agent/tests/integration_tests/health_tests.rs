//! Integration tests for health check and statistics.
//!
//! Tests cover:
//! - Health check endpoint
//! - Counters of an idle agent

use axum::http::StatusCode;

use super::common::{get, test_app};

#[tokio::test]
async fn test_health_check() {
    let (app, _, _) = test_app();

    let (status, response) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "healthy");
    assert_eq!(response["service"], "sieve-agent");
}

#[tokio::test]
async fn test_stats_start_at_zero() {
    let (app, _, _) = test_app();

    let (status, stats) = get(app, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["metrics_processed"], 0);
    assert_eq!(stats["dropped_by_cardinality"], 0);
    assert_eq!(stats["aggregator"]["active_buckets"], 0);
    assert_eq!(stats["exporter"]["points_exported"], 0);
    assert!(stats["sampler"]["current_rate"].is_number());
}

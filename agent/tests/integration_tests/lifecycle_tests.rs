//! Integration tests for batching and shutdown.
//!
//! Tests cover:
//! - Size-triggered batches with aggregation disabled
//! - Records and health after shutdown

use axum::http::StatusCode;
use pipeline::exporter::Signal;
use serde_json::json;

use super::common::{get, post_json, test_app, test_app_with, test_config};
use super::TIMEOUT;

#[tokio::test]
async fn test_metrics_exported_directly_without_aggregation() {
    let mut config = test_config();
    config.aggregation.enabled = false;
    config.export.batch_size = 2;
    let (app, pipeline, transport) = test_app_with(config);

    let (status, _) = post_json(
        app,
        "/api/v1/metrics",
        json!([
            {"name": "a", "value": 1},
            {"name": "b", "value": 2},
            {"name": "c", "value": 3}
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    pipeline.shutdown(TIMEOUT).await.unwrap();
    assert_eq!(transport.signals(), vec![Signal::Metrics, Signal::Metrics]);
    assert_eq!(pipeline.stats().exporter.points_exported, 3);
}

#[tokio::test]
async fn test_ingest_after_shutdown_is_counted() {
    let (app, pipeline, _) = test_app();
    pipeline.shutdown(TIMEOUT).await.unwrap();

    let (status, response) =
        post_json(app.clone(), "/api/v1/metrics", json!({"name": "late", "value": 1})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(response["accepted"], 1);

    let (_, stats) = get(app.clone(), "/stats").await;
    assert_eq!(stats["dropped_after_shutdown"], 1);

    let (status, health) = get(app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "draining");
}

//! Integration tests for metric ingestion.
//!
//! Tests cover:
//! - Single and batched metric ingestion
//! - Partial rejection of invalid entries
//! - Empty, malformed and oversized bodies

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;

use super::common::{get, post_json, post_raw, test_app};
use super::TIMEOUT;

#[tokio::test]
async fn test_ingest_single_metric() {
    let (app, pipeline, _) = test_app();

    let (status, response) = post_json(
        app.clone(),
        "/api/v1/metrics",
        json!({"name": "cpu.usage", "value": 0.42, "labels": {"core": "0"}}),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(response["accepted"], 1);
    assert_eq!(response["rejected"], 0);

    let (_, stats) = get(app, "/stats").await;
    assert_eq!(stats["metrics_processed"], 1);
    assert_eq!(stats["aggregator"]["metrics_in"], 1);

    pipeline.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_ingest_batch_with_invalid_entries() {
    let (app, pipeline, _) = test_app();

    let (status, response) = post_json(
        app,
        "/api/v1/metrics",
        json!([
            {"name": "requests", "value": 1, "metric_type": "counter"},
            {"name": "", "value": 1},
            {"name": "memory", "value": 512, "labels": {" ": "x"}}
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(response["accepted"], 1);
    assert_eq!(response["rejected"], 2);
    assert_eq!(response["errors"].as_array().unwrap().len(), 2);

    assert_eq!(pipeline.stats().metrics_processed, 1);
    pipeline.shutdown(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_empty_batch_rejected() {
    let (app, _, _) = test_app();

    let (status, response) = post_json(app, "/api/v1/metrics", json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "empty_batch");
}

#[tokio::test]
async fn test_no_valid_metric_rejected() {
    let (app, _, _) = test_app();

    let (status, response) =
        post_json(app, "/api/v1/metrics", json!({"name": "", "value": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "invalid_records");
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let (app, _, _) = test_app();

    let (status, _) = post_raw(app, "/api/v1/metrics", "{not json".to_string()).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let (app, _, _) = test_app();
    let body = "x".repeat(agent::MAX_BODY_BYTES + 1);

    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("POST")
            .uri("/api/v1/metrics")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

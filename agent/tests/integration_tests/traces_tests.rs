//! Integration tests for span ingestion.

use axum::http::StatusCode;
use pipeline::exporter::Signal;
use serde_json::json;

use super::common::{post_json, test_app};
use super::TIMEOUT;

#[tokio::test]
async fn test_ingest_spans_exported() {
    let (app, pipeline, transport) = test_app();

    let (status, response) = post_json(
        app,
        "/api/v1/traces",
        json!([
            {"trace_id": "abc", "span_id": "1", "name": "GET /", "duration_ms": 12},
            {"trace_id": "abc", "span_id": "2", "parent_span_id": "1", "name": "db.query", "status": "error"},
            {"trace_id": "", "span_id": "3", "name": "orphan"}
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(response["accepted"], 2);
    assert_eq!(response["rejected"], 1);

    pipeline.shutdown(TIMEOUT).await.unwrap();
    assert_eq!(transport.signals(), vec![Signal::Traces]);
    assert_eq!(pipeline.stats().exporter.points_exported, 2);
}

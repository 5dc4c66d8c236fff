//! Integration tests for log ingestion.
//!
//! Tests cover:
//! - Pattern grouping of similar log lines
//! - Rejection of empty bodies

use axum::http::StatusCode;
use pipeline::exporter::Signal;
use serde_json::json;

use super::common::{post_json, test_app};
use super::TIMEOUT;

#[tokio::test]
async fn test_ingest_logs_grouped_on_flush() {
    let (app, pipeline, transport) = test_app();

    let (status, response) = post_json(
        app,
        "/api/v1/logs",
        json!([
            {"body": "Connection timeout to 10.0.0.5:5432", "severity": "error"},
            {"body": "Connection timeout to 10.0.0.6:5432", "severity": "error"},
            {"body": "", "severity": "info"}
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(response["accepted"], 2);
    assert_eq!(response["rejected"], 1);

    let stats = pipeline.stats();
    assert_eq!(stats.aggregator.active_log_groups, 1);

    tokio_test::assert_ok!(pipeline.shutdown(TIMEOUT).await);
    assert_eq!(transport.signals(), vec![Signal::Logs]);
    assert_eq!(pipeline.stats().exporter.points_exported, 1);
}

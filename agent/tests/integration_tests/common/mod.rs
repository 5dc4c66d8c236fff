//! Common test utilities for agent integration tests.
//!
//! Provides a router backed by a pipeline that delivers into memory, and
//! HTTP request helpers.

use agent::{create_router, AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pipeline::exporter::{ExportError, ExportRequest, Signal, Transport};
use pipeline::{Pipeline, PipelineConfig};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Transport counting the requests delivered per signal.
#[derive(Debug, Default)]
pub struct CountingTransport {
    signals: Mutex<Vec<Signal>>,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send(&self, request: &ExportRequest) -> Result<u64, ExportError> {
        self.signals.lock().unwrap().push(request.signal());
        Ok(request.protobuf_len() as u64)
    }
}

impl CountingTransport {
    /// Returns the signals of every delivered request.
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }
}

/// Pipeline configuration without host detection or sampling.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.enrichment.add_hostname = false;
    config.enrichment.cloud.enabled = false;
    config.enrichment.kubernetes.enabled = false;
    config.sampling.enabled = false;
    config
}

/// Creates a test router around a fresh pipeline.
///
/// # Returns
///
/// The router, the pipeline behind it and its transport.
pub fn test_app_with(config: PipelineConfig) -> (Router, Arc<Pipeline>, Arc<CountingTransport>) {
    let transport = Arc::new(CountingTransport::default());
    let pipeline = Arc::new(Pipeline::with_transport(config, transport.clone()).unwrap());
    let router = create_router(AppState::new(Arc::clone(&pipeline)));
    (router, pipeline, transport)
}

/// Creates a test router with the default test configuration.
pub fn test_app() -> (Router, Arc<Pipeline>, Arc<CountingTransport>) {
    test_app_with(test_config())
}

/// Helper to make a POST request with a raw body.
pub async fn post_raw(app: Router, uri: &str, body: String) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}

/// Helper to make a POST request with a JSON body.
pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    post_raw(app, uri, serde_json::to_string(&body).unwrap()).await
}

/// Helper to make a GET request.
pub async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}

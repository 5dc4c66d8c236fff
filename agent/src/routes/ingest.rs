//! Push ingestion endpoints.
//!
//! Each endpoint accepts a single record or an array of records. Records
//! failing validation are counted and reported; the rest enter the pipeline.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use pipeline::models::{LogRecord, Metric, Span};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Rejection messages returned per request, at most.
const MAX_REPORTED_ERRORS: usize = 10;

/// Request body: one record or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IngestRequest<T> {
    /// Several records.
    Batch(Vec<T>),
    /// One record.
    Single(T),
}

impl<T> IngestRequest<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Batch(records) => records,
            Self::Single(record) => vec![record],
        }
    }
}

/// Response for an accepted request.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Records handed to the pipeline.
    pub accepted: usize,
    /// Records that failed validation.
    pub rejected: usize,
    /// Validation messages, truncated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestError {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable description.
    pub message: String,
    /// Validation messages, truncated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

type IngestResult = Result<(StatusCode, Json<IngestResponse>), (StatusCode, Json<IngestError>)>;

/// Creates the ingestion routes.
pub fn ingest_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/metrics", post(ingest_metrics))
        .route("/api/v1/logs", post(ingest_logs))
        .route("/api/v1/traces", post(ingest_traces))
        .with_state(state)
}

async fn ingest_metrics(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest<Metric>>,
) -> IngestResult {
    ingest(request.into_vec(), "metric", Metric::validate_metric, |metric| {
        state.pipeline().process_metric(metric);
    })
}

async fn ingest_logs(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest<LogRecord>>,
) -> IngestResult {
    ingest(request.into_vec(), "log", LogRecord::validate_record, |record| {
        state.pipeline().process_log(record);
    })
}

async fn ingest_traces(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest<Span>>,
) -> IngestResult {
    ingest(request.into_vec(), "span", Span::validate_span, |span| {
        state.pipeline().process_span(span);
    })
}

fn ingest<T, E, V, P>(records: Vec<T>, kind: &str, validate: V, process: P) -> IngestResult
where
    E: Display,
    V: Fn(&T) -> Result<(), E>,
    P: Fn(T),
{
    if records.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(IngestError {
                error: "empty_batch".to_string(),
                message: format!("At least one {kind} is required"),
                errors: Vec::new(),
            }),
        ));
    }

    let total = records.len();
    let mut accepted = 0;
    let mut errors = Vec::new();

    for (index, record) in records.into_iter().enumerate() {
        match validate(&record) {
            Ok(()) => {
                process(record);
                accepted += 1;
            }
            Err(err) => {
                if errors.len() < MAX_REPORTED_ERRORS {
                    errors.push(format!("{kind} {index}: {err}"));
                }
            }
        }
    }

    let rejected = total - accepted;
    if rejected > 0 {
        tracing::warn!(kind, accepted, rejected, "Rejected invalid records");
    }

    if accepted == 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(IngestError {
                error: "invalid_records".to_string(),
                message: format!("No valid {kind} in request"),
                errors,
            }),
        ));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            accepted,
            rejected,
            errors,
        }),
    ))
}

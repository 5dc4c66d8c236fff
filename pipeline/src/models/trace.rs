//! Span data model.
//!
//! Spans are never aggregated; they are sampled per trace and exported
//! directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

/// Outcome recorded on a span. Error spans bypass trace sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Not reported.
    #[default]
    Unset,
    /// Explicitly successful.
    Ok,
    /// Failed.
    Error,
}

impl SpanStatus {
    /// Returns the OTLP status code (`0` unset, `1` ok, `2` error).
    #[must_use]
    pub const fn otlp_code(self) -> i32 {
        match self {
            Self::Unset => 0,
            Self::Ok => 1,
            Self::Error => 2,
        }
    }
}

/// One timed operation within a trace.
///
/// All spans of a trace share `trace_id`, which is the sampling key.
///
/// # Example
///
/// ```
/// use pipeline::models::{Span, SpanStatus};
/// use std::time::Duration;
///
/// let span = Span::new("4bf92f3577b34da6", "00f067aa0ba902b7", "GET /api/users")
///     .with_duration(Duration::from_millis(120))
///     .with_status(SpanStatus::Ok)
///     .with_attribute("http.method", "GET");
///
/// assert!(span.validate_span().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Span {
    /// Trace identifier; hashed for the keep/drop decision.
    #[validate(length(min = 1, message = "Trace ID cannot be empty"))]
    pub trace_id: String,

    /// Identifier of this span.
    #[validate(length(min = 1, message = "Span ID cannot be empty"))]
    pub span_id: String,

    /// Parent span, absent on the entry span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// Operation name.
    #[validate(length(min = 1, message = "Span name cannot be empty"))]
    pub name: String,

    /// Start time. Defaults to arrival time.
    #[serde(default = "Utc::now")]
    pub start_time: DateTime<Utc>,

    /// Elapsed time, pushed as `duration_ms`.
    #[serde(rename = "duration_ms", with = "duration_millis", default)]
    pub duration: Duration,

    #[serde(default)]
    pub status: SpanStatus,

    /// Span attributes. Enrichment adds host context here.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Reasons a pushed span is refused.
#[derive(Debug, Error)]
pub enum SpanValidationError {
    /// Missing `trace_id`.
    #[error("Trace ID cannot be empty")]
    EmptyTraceId,

    /// Missing `span_id`.
    #[error("Span ID cannot be empty")]
    EmptySpanId,

    /// Missing `name`.
    #[error("Span name cannot be empty")]
    EmptyName,

    /// Derived field checks failed.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl Span {
    /// Creates a new span starting now with zero duration and unset status.
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            name: name.into(),
            start_time: Utc::now(),
            duration: Duration::ZERO,
            status: SpanStatus::Unset,
            attributes: HashMap::new(),
        }
    }

    /// Links the span to its parent.
    #[must_use]
    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    /// Sets the elapsed time.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Records the outcome.
    #[must_use]
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    /// Overrides the start time.
    #[must_use]
    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Start time plus duration, saturating at the start time on overflow.
    #[must_use]
    pub fn end_time(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| self.start_time.checked_add_signed(d))
            .unwrap_or(self.start_time)
    }

    /// Checks that the span can enter the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first missing identifier.
    pub fn validate_span(&self) -> Result<(), SpanValidationError> {
        if self.trace_id.is_empty() {
            return Err(SpanValidationError::EmptyTraceId);
        }
        if self.span_id.is_empty() {
            return Err(SpanValidationError::EmptySpanId);
        }
        if self.name.is_empty() {
            return Err(SpanValidationError::EmptyName);
        }
        self.validate()?;
        Ok(())
    }
}

/// Serializes a `Duration` as an integer number of milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

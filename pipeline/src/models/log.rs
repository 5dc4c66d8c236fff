//! Log data model.
//!
//! Defines the `LogRecord` structure and its ordered `Severity` scale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use validator::Validate;

/// Log severity.
///
/// Variants are declared in ascending order, so comparisons follow
/// `trace < debug < info < warn < error < fatal`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Finest-grained diagnostics.
    Trace,
    /// Diagnostics, sampled at the debug rate.
    Debug,
    /// Routine events.
    #[default]
    Info,
    /// Something unexpected that did not fail.
    Warn,
    /// A failed operation.
    Error,
    /// The process cannot continue.
    Fatal,
}

impl Severity {
    /// Returns the lowest OTLP severity number of this level's range.
    ///
    /// OTLP assigns trace 1-4, debug 5-8, info 9-12, warn 13-16, error 17-20
    /// and fatal 21-24.
    #[must_use]
    pub const fn otlp_number(self) -> i32 {
        match self {
            Self::Trace => 1,
            Self::Debug => 5,
            Self::Info => 9,
            Self::Warn => 13,
            Self::Error => 17,
            Self::Fatal => 21,
        }
    }

    /// Returns the upper-case severity text used on the wire.
    #[must_use]
    pub const fn as_text(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

/// One log line.
///
/// Lines whose bodies normalise to the same template are merged by the
/// aggregator within a window.
///
/// # Example
///
/// ```
/// use pipeline::models::{LogRecord, Severity};
///
/// let log = LogRecord::new(Severity::Error, "Connection timeout to 10.0.0.5:5432")
///     .with_attribute("service", "orders");
///
/// assert!(log.severity > Severity::Warn);
/// assert!(log.validate_record().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LogRecord {
    /// When the line was emitted. Defaults to arrival time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Message text, the input to template normalisation.
    #[validate(length(min = 1, message = "Body cannot be empty"))]
    pub body: String,

    /// Severity; drives log sampling.
    #[serde(default)]
    pub severity: Severity,

    /// Structured attributes. Enrichment and grouping add to these.
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// Trace the line was logged under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Span the line was logged under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

/// Reasons a pushed log record is refused.
#[derive(Debug, Error)]
pub enum LogValidationError {
    /// Nothing to log.
    #[error("Log body cannot be empty")]
    EmptyBody,

    /// Derived field checks failed.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(severity: Severity, body: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            body: body.into(),
            severity,
            attributes: HashMap::new(),
            trace_id: None,
            span_id: None,
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Overrides the emission time.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Correlates the line with a trace.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Correlates the line with a span.
    #[must_use]
    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    /// Checks that the record can enter the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is empty.
    pub fn validate_record(&self) -> Result<(), LogValidationError> {
        if self.body.is_empty() {
            return Err(LogValidationError::EmptyBody);
        }
        self.validate()?;
        Ok(())
    }
}

//! Data models for the Sieve telemetry pipeline.
//!
//! This module contains the record types producers push into the pipeline:
//! metric data points, log records, and trace spans.

pub mod log;
pub mod metric;
pub mod trace;

pub use log::{LogRecord, LogValidationError, Severity};
pub use metric::{Metric, MetricType, MetricValidationError};
pub use trace::{Span, SpanStatus, SpanValidationError};

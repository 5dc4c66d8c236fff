//! Sieve Pipeline Library
//!
//! This crate contains the in-process telemetry processing pipeline used by
//! the Sieve agent. It sits between instrumented applications and a remote
//! collector and reduces the volume and cardinality of the telemetry stream
//! before delivering it in batches.
//!
//! # Modules
//!
//! - [`models`] - Data models for metrics, logs, and spans
//! - [`config`] - Pipeline configuration and startup validation
//! - [`cardinality`] - Per-metric series and per-label value caps
//! - [`sampler`] - Consistent trace sampling, log sampling, and rate feedback
//! - [`enrichment`] - Host, cloud, and orchestration metadata merge
//! - [`aggregator`] - Windowed metric statistics and log deduplication
//! - [`exporter`] - Batched, non-blocking export over a [`exporter::Transport`]
//! - [`pipeline`] - The orchestrator wiring everything together
//!
//! # Example
//!
//! ```
//! use pipeline::models::{LogRecord, Severity};
//!
//! let log = LogRecord::new(Severity::Warn, "Disk usage above 90%")
//!     .with_attribute("mount", "/var")
//!     .with_trace_id("4bf92f3577b34da6a3ce929d0e0e4736");
//!
//! assert!(log.validate_record().is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aggregator;
pub mod cardinality;
pub mod config;
pub mod enrichment;
pub mod exporter;
pub mod models;
pub mod pipeline;
pub mod sampler;

pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{Pipeline, PipelineError, PipelineStats};

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;

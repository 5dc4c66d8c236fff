//! Integration tests for the Sieve agent HTTP surface.
//!
//! These tests drive the router end to end: records posted to the ingest
//! endpoints flow through the pipeline and show up in `/stats` and at the
//! transport.

mod common;
mod health_tests;
mod lifecycle_tests;
mod logs_tests;
mod metrics_tests;
mod traces_tests;

use std::time::Duration;

/// Upper bound for draining the pipeline at the end of a test.
const TIMEOUT: Duration = Duration::from_secs(5);

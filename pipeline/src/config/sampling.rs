//! Sampling configuration.

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Trace and log sampling settings, including the byte-budget controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SamplingConfig {
    /// When disabled every span and log record is kept.
    pub enabled: bool,

    /// Target exported bytes per second. `0` disables rate feedback.
    pub target_bytes_per_sec: u64,

    /// Interval between controller adjustments, in milliseconds.
    #[validate(range(min = 1))]
    pub adjust_interval_ms: u64,

    /// Initial trace sampling rate.
    #[validate(range(min = 0.0, max = 1.0))]
    pub trace_rate: f64,

    /// Keep every span whose status is error.
    pub always_sample_errors: bool,

    /// Keep every span at least this long, in milliseconds. `0` disables.
    pub slow_threshold_ms: u64,

    /// Multiplier applied to the rate for operations seen only a few times.
    #[validate(range(min = 1.0))]
    pub rare_operation_boost: f64,

    /// Evaluations below which an operation counts as rare.
    pub rare_operation_threshold: u64,

    /// Factor applied when exported bytes exceed the target.
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub rate_decrease_factor: f64,

    /// Factor applied when exported bytes fall under half the target.
    #[validate(range(min = 1.0))]
    pub rate_increase_factor: f64,

    /// Lower bound for the controlled trace rate.
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_rate: f64,

    /// Keep probability for info records.
    #[validate(range(min = 0.0, max = 1.0))]
    pub log_info_rate: f64,

    /// Keep probability for debug and trace records.
    #[validate(range(min = 0.0, max = 1.0))]
    pub log_debug_rate: f64,

    /// Keep every error and fatal record.
    pub always_keep_errors: bool,

    /// Keep every warn record.
    pub always_keep_warnings: bool,
}

impl SamplingConfig {
    /// Returns the slow-span threshold, if enabled.
    #[must_use]
    pub const fn slow_threshold(&self) -> Option<Duration> {
        if self.slow_threshold_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.slow_threshold_ms))
        }
    }

    /// Returns the controller adjustment interval.
    #[must_use]
    pub const fn adjust_interval(&self) -> Duration {
        Duration::from_millis(self.adjust_interval_ms)
    }

    pub(crate) fn validate_constraints(&self) -> Result<(), ConfigError> {
        if self.min_rate > self.trace_rate {
            return Err(ConfigError::Constraint(format!(
                "min_rate ({}) exceeds trace_rate ({})",
                self.min_rate, self.trace_rate
            )));
        }
        Ok(())
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_bytes_per_sec: 1024 * 1024,
            adjust_interval_ms: 1000,
            trace_rate: 0.1,
            always_sample_errors: true,
            slow_threshold_ms: 1000,
            rare_operation_boost: 5.0,
            rare_operation_threshold: 100,
            rate_decrease_factor: 0.9,
            rate_increase_factor: 1.1,
            min_rate: 0.01,
            log_info_rate: 0.1,
            log_debug_rate: 0.01,
            always_keep_errors: true,
            always_keep_warnings: true,
        }
    }
}

//! Metric data model.
//!
//! Defines the `Metric` data point that flows through cardinality control,
//! enrichment, and aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use validator::Validate;

/// Semantic kind of a metric value. Counters export as cumulative sums,
/// everything else as gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Point-in-time reading such as free memory.
    #[default]
    Gauge,
    /// Running total that only grows, such as bytes received.
    Counter,
    /// One observation destined for a distribution.
    Histogram,
    /// A pre-computed summary observation.
    Summary,
}

/// One sampled value of a named series.
///
/// A series is the name together with its sorted label set; the
/// cardinality controller and the aggregator both key on it.
///
/// # Example
///
/// ```
/// use pipeline::models::{Metric, MetricType};
///
/// let metric = Metric::counter("http_requests_total", 1234.0)
///     .with_label("method", "GET")
///     .with_label("status", "200");
///
/// assert_eq!(metric.metric_type, MetricType::Counter);
/// assert!(metric.validate_metric().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Metric {
    /// Series name, e.g. `system.cpu.usage`.
    #[validate(length(min = 1, message = "Metric name cannot be empty"))]
    pub name: String,

    /// Sampled value. Must be finite to be exported.
    pub value: f64,

    /// When the value was sampled. Defaults to arrival time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Series dimensions.
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Semantic kind.
    #[serde(default)]
    pub metric_type: MetricType,

    /// Unit carried through to OTLP, e.g. `By` or `s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Reasons a pushed metric is refused.
#[derive(Debug, Error)]
pub enum MetricValidationError {
    /// No series name.
    #[error("Metric name cannot be empty")]
    EmptyName,

    /// A label key is blank.
    #[error("Invalid label name: '{0}'")]
    InvalidLabelName(String),

    /// NaN or infinite value.
    #[error("Metric value must be finite")]
    NonFiniteValue,

    /// Derived field checks failed.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl Metric {
    /// Creates a metric stamped with the current time and no labels.
    #[must_use]
    pub fn new(name: impl Into<String>, metric_type: MetricType, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Utc::now(),
            labels: HashMap::new(),
            metric_type,
            unit: None,
        }
    }

    /// Shorthand for a [`MetricType::Gauge`].
    #[must_use]
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricType::Gauge, value)
    }

    /// Shorthand for a [`MetricType::Counter`].
    #[must_use]
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricType::Counter, value)
    }

    /// Sets a label, replacing any previous value for `key`.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Overrides the sample time.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns the labels as key/value pairs sorted by key.
    #[must_use]
    pub fn sorted_labels(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Checks that the metric can enter the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or a label key is blank, or the value
    /// is not finite.
    pub fn validate_metric(&self) -> Result<(), MetricValidationError> {
        if self.name.is_empty() {
            return Err(MetricValidationError::EmptyName);
        }
        if let Some(key) = self.labels.keys().find(|k| k.trim().is_empty()) {
            return Err(MetricValidationError::InvalidLabelName(key.clone()));
        }
        if !self.value.is_finite() {
            return Err(MetricValidationError::NonFiniteValue);
        }
        self.validate()?;
        Ok(())
    }
}

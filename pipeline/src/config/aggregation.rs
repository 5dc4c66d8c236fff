//! Aggregation configuration.
//!
//! Controls the window over which raw metric values are reduced to summary
//! statistics and over which similar log lines are grouped.

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// A statistic computed over the values of a metric bucket on flush.
///
/// Each aggregate becomes its own output metric named `{name}.{suffix}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregateFunction {
    /// Smallest value in the window.
    Min,
    /// Largest value in the window.
    Max,
    /// Sum of all values.
    Sum,
    /// Number of values.
    Count,
    /// Arithmetic mean.
    Avg,
    /// Percentile in `[0, 100]`, computed by linear interpolation.
    Percentile(f64),
}

impl AggregateFunction {
    /// Returns the name suffix appended to aggregated metrics.
    #[must_use]
    pub fn suffix(&self) -> String {
        match self {
            Self::Min => "min".to_string(),
            Self::Max => "max".to_string(),
            Self::Sum => "sum".to_string(),
            Self::Count => "count".to_string(),
            Self::Avg => "avg".to_string(),
            Self::Percentile(p) => format!("p{p}"),
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "avg" | "mean" => Ok(Self::Avg),
            other => other
                .strip_prefix('p')
                .and_then(|p| p.parse::<f64>().ok())
                .filter(|p| p.is_finite() && (0.0..=100.0).contains(p))
                .map(Self::Percentile)
                .ok_or_else(|| ConfigError::UnknownAggregate(s.to_string())),
        }
    }
}

impl TryFrom<String> for AggregateFunction {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AggregateFunction> for String {
    fn from(value: AggregateFunction) -> Self {
        value.suffix()
    }
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Windowed aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AggregationConfig {
    /// Whether metrics and logs are aggregated at all. When disabled they
    /// are exported as they arrive.
    pub enabled: bool,

    /// Aggregation window in milliseconds.
    #[validate(range(min = 1000, message = "Aggregation window must be at least 1s"))]
    pub window_ms: u64,

    /// Statistics computed per bucket on flush.
    pub aggregates: Vec<AggregateFunction>,

    /// When false, the last raw value is also emitted under the original name.
    pub drop_raw_metrics: bool,

    /// Group log lines sharing a normalised template.
    pub group_similar_logs: bool,

    /// Token similarity at which a new template joins an existing group.
    /// `1.0` requires an exact template match.
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f64,

    /// Maximum number of distinct templates held per window.
    #[validate(range(min = 1))]
    pub max_log_patterns: usize,
}

impl AggregationConfig {
    /// Returns the aggregation window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub(crate) fn validate_constraints(&self) -> Result<(), ConfigError> {
        if self.enabled && self.drop_raw_metrics && self.aggregates.is_empty() {
            return Err(ConfigError::Constraint(
                "Raw metrics are dropped but no aggregates are configured".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            aggregates: vec![
                AggregateFunction::Min,
                AggregateFunction::Max,
                AggregateFunction::Sum,
                AggregateFunction::Count,
                AggregateFunction::Avg,
            ],
            drop_raw_metrics: true,
            group_similar_logs: true,
            similarity_threshold: 1.0,
            max_log_patterns: 10_000,
        }
    }
}

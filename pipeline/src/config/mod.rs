//! Configuration module for the Sieve pipeline.
//!
//! Every section deserializes with defaults, so a configuration file only
//! needs to name the options it changes. Validation runs once at startup via
//! [`PipelineConfig::validate_config`]; nothing is re-checked at runtime.

pub mod aggregation;
pub mod cardinality;
pub mod enrichment;
pub mod export;
pub mod sampling;

pub use aggregation::{AggregateFunction, AggregationConfig};
pub use cardinality::CardinalityConfig;
pub use enrichment::{CloudConfig, CloudProvider, EnrichmentConfig, KubernetesConfig};
pub use export::{ExportConfig, Protocol, RetryConfig, TlsConfig};
pub use sampling::SamplingConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use validator::Validate;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An aggregate function name was not recognised.
    #[error("Unknown aggregate function: '{0}'")]
    UnknownAggregate(String),

    /// A field failed a range or length check.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// A cross-field constraint was violated.
    #[error("Invalid configuration: {0}")]
    Constraint(String),

    /// The configuration file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Complete configuration for the processing pipeline.
///
/// # Example
///
/// ```
/// use pipeline::PipelineConfig;
///
/// let config: PipelineConfig = serde_json::from_str(r#"{
///     "aggregation": {"aggregates": ["min", "max", "p99"]},
///     "export": {"endpoint": "collector.internal:4318"}
/// }"#).unwrap();
///
/// assert!(config.validate_config().is_ok());
/// assert_eq!(config.aggregation.aggregates.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// Windowed aggregation of metrics and logs.
    #[validate(nested)]
    pub aggregation: AggregationConfig,
    /// Trace and log sampling.
    #[validate(nested)]
    pub sampling: SamplingConfig,
    /// Series and label-value caps.
    pub cardinality: CardinalityConfig,
    /// Metadata merged into outgoing records.
    pub enrichment: EnrichmentConfig,
    /// Batching and delivery.
    #[validate(nested)]
    pub export: ExportConfig,
}

impl PipelineConfig {
    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. The result is
    /// not validated; call [`Self::validate_config`] afterwards.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Validates every section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A rate is outside `[0, 1]` or a size/interval is zero
    /// - The aggregation window is shorter than one second
    /// - Raw metrics are dropped but no aggregate is configured
    /// - The export endpoint is empty
    /// - The retry backoff bounds are inverted
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()?;
        self.aggregation.validate_constraints()?;
        self.sampling.validate_constraints()?;
        self.export.validate_constraints()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_empty_json_yields_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_unknown_aggregate_rejected_at_parse() {
        let result: Result<PipelineConfig, _> =
            serde_json::from_str(r#"{"aggregation": {"aggregates": ["min", "median"]}}"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("median"));
    }

    #[test]
    fn test_out_of_range_rate_rejected() {
        let mut config = PipelineConfig::default();
        config.sampling.trace_rate = 1.5;
        assert!(matches!(
            config.validate_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = PipelineConfig::default();
        config.export.batch_size = 0;
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let mut config = PipelineConfig::default();
        config.export.endpoint = String::new();
        assert!(matches!(
            config.validate_config(),
            Err(ConfigError::Constraint(_))
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let result = PipelineConfig::from_file("/nonexistent/sieve.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("sieve-config-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"sampling": {"trace_rate": 0.25}, "export": {"batch_size": 50}}"#,
        )
        .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!((config.sampling.trace_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.export.batch_size, 50);
        assert!(config.validate_config().is_ok());
    }
}

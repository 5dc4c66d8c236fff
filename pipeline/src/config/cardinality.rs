//! Cardinality control configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caps on the number of series per metric and values per label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardinalityConfig {
    /// When disabled every metric is admitted unchanged.
    pub enabled: bool,

    /// Maximum distinct label combinations per metric name. `0` means
    /// unlimited.
    pub max_series_per_metric: usize,

    /// Per-label cap on distinct values. A cap of `0` strips the label.
    pub max_label_values: HashMap<String, usize>,

    /// Labels removed from every metric before any other check.
    pub drop_labels: Vec<String>,
}

impl Default for CardinalityConfig {
    fn default() -> Self {
        let max_label_values = [
            ("user_id", 0),
            ("request_id", 0),
            ("session_id", 0),
            ("trace_id", 0),
            ("endpoint", 1000),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            enabled: true,
            max_series_per_metric: 10_000,
            max_label_values,
            drop_labels: ["password", "token", "secret", "key"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_strip_identifiers() {
        let config = CardinalityConfig::default();
        assert_eq!(config.max_label_values.get("user_id"), Some(&0));
        assert_eq!(config.max_label_values.get("endpoint"), Some(&1000));
        assert!(config.drop_labels.contains(&"password".to_string()));
    }

    #[test]
    fn test_partial_json_keeps_other_defaults() {
        let config: CardinalityConfig =
            serde_json::from_str(r#"{"max_series_per_metric": 5}"#).unwrap();
        assert_eq!(config.max_series_per_metric, 5);
        assert!(config.enabled);
        assert_eq!(config.drop_labels.len(), 4);
    }
}

//! Export configuration.

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// OTLP transport used towards the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// OTLP/HTTP with JSON bodies.
    #[default]
    HttpJson,
    /// OTLP/HTTP with protobuf bodies.
    HttpProtobuf,
    /// OTLP/gRPC.
    Grpc,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpJson => write!(f, "http/json"),
            Self::HttpProtobuf => write!(f, "http/protobuf"),
            Self::Grpc => write!(f, "grpc"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    /// Accepts the `OTEL_EXPORTER_OTLP_PROTOCOL` spellings as well as the
    /// snake-case names used in configuration files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http/json" | "http_json" | "json" => Ok(Self::HttpJson),
            "http/protobuf" | "http_protobuf" | "protobuf" => Ok(Self::HttpProtobuf),
            "grpc" => Ok(Self::Grpc),
            _ => Err(ConfigError::Constraint(format!(
                "Unknown export protocol: '{s}'"
            ))),
        }
    }
}

/// TLS settings for the outbound connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Use `https` for the collector endpoint.
    pub enabled: bool,
    /// PEM file with an additional root certificate.
    pub ca_file: Option<String>,
    /// Accept any server certificate. For test environments only.
    pub skip_verify: bool,
}

/// Retry policy for failed batch deliveries.
///
/// Disabled by default: a failed batch is dropped and counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetryConfig {
    /// Whether failed deliveries are retried.
    pub enabled: bool,
    /// Total attempts per batch, including the first.
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for the exponential backoff, in milliseconds.
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    /// Returns the number of attempts a batch gets.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts
        } else {
            1
        }
    }

    /// Returns the backoff before retry number `retry` (starting at 1).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Batching and delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExportConfig {
    /// Collector address, `host:port` or a full URL.
    pub endpoint: String,
    /// Wire protocol.
    pub protocol: Protocol,
    /// Sent as the `X-API-Key` header when set.
    pub api_key: Option<String>,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub bearer_token: Option<String>,
    /// TLS settings.
    pub tls: TlsConfig,
    /// Records per batch before an immediate flush.
    #[validate(range(min = 1))]
    pub batch_size: usize,
    /// Interval of the periodic flush, in milliseconds.
    #[validate(range(min = 1))]
    pub batch_timeout_ms: u64,
    /// Fixed timeout of each outbound request, in milliseconds.
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,
    /// Retry policy.
    #[validate(nested)]
    pub retry: RetryConfig,
}

impl ExportConfig {
    /// Returns the periodic flush interval.
    #[must_use]
    pub const fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the base URL of the collector, adding a scheme when the
    /// endpoint is a bare `host:port`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if self.tls.enabled {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        }
    }

    pub(crate) fn validate_constraints(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Constraint(
                "Export endpoint is required".to_string(),
            ));
        }
        if self.retry.enabled && self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Constraint(
                "Retry initial backoff exceeds max backoff".to_string(),
            ));
        }
        if self.protocol == Protocol::Grpc && self.tls.skip_verify {
            return Err(ConfigError::Constraint(
                "tls.skip_verify is not supported with the grpc protocol".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:4318".to_string(),
            protocol: Protocol::default(),
            api_key: None,
            bearer_token: None,
            tls: TlsConfig::default(),
            batch_size: 1000,
            batch_timeout_ms: 5000,
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

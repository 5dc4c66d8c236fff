//! Agent configuration module.
//!
//! Loads the pipeline configuration file and applies environment overrides.

use anyhow::{Context, Result};
use pipeline::PipelineConfig;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Output format of the agent's own logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        })
    }
}

/// Agent configuration.
///
/// Configuration values can be set via environment variables:
/// - `SIEVE_HOST`: The host address to bind to (default: "127.0.0.1")
/// - `SIEVE_PORT`: The port to listen on (default: 8686)
/// - `SIEVE_CONFIG`: Path to a JSON pipeline configuration file
/// - `SIEVE_ENDPOINT`: Collector endpoint, overrides the file
/// - `SIEVE_PROTOCOL`: `http/json`, `http/protobuf` or `grpc`
/// - `SIEVE_API_KEY` / `SIEVE_BEARER_TOKEN`: Collector credentials
/// - `SIEVE_ENVIRONMENT`: Deployment environment tag
/// - `SIEVE_HOSTNAME`: Host tag, skipping hostname detection
/// - `SIEVE_LOG_FORMAT`: `json` for JSON logs, text otherwise
/// - `SIEVE_SHUTDOWN_TIMEOUT_MS`: Time allowed to drain exports (default: 10000)
#[derive(Debug, Clone)]
pub struct Config {
    /// The host address to bind to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
    /// Pipeline configuration.
    pub pipeline: PipelineConfig,
    /// Log output format.
    pub log_format: LogFormat,
    /// Time allowed for in-flight exports on shutdown.
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Creates a configuration from the process environment, after loading
    /// an optional `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `SIEVE_PORT` or `SIEVE_SHUTDOWN_TIMEOUT_MS` is not a valid number
    /// - `SIEVE_CONFIG` names a file that cannot be read or parsed
    /// - `SIEVE_PROTOCOL` is not a known export protocol
    pub fn from_env() -> Result<Self> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Creates a configuration from a variable lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = var("SIEVE_HOST") {
            config.host = host;
        }
        if let Some(port) = var("SIEVE_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("Invalid SIEVE_PORT: {port}"))?;
        }
        if let Some(timeout) = var("SIEVE_SHUTDOWN_TIMEOUT_MS") {
            let millis: u64 = timeout
                .parse()
                .with_context(|| format!("Invalid SIEVE_SHUTDOWN_TIMEOUT_MS: {timeout}"))?;
            config.shutdown_timeout = Duration::from_millis(millis);
        }
        if let Some(format) = var("SIEVE_LOG_FORMAT") {
            config.log_format = format.parse().unwrap_or_default();
        }

        if let Some(path) = var("SIEVE_CONFIG") {
            config.pipeline = PipelineConfig::from_file(&path)
                .with_context(|| format!("Failed to load pipeline config from {path}"))?;
        }

        let export = &mut config.pipeline.export;
        if let Some(endpoint) = var("SIEVE_ENDPOINT") {
            export.endpoint = endpoint;
        }
        if let Some(protocol) = var("SIEVE_PROTOCOL") {
            export.protocol = protocol
                .parse()
                .with_context(|| format!("Invalid SIEVE_PROTOCOL: {protocol}"))?;
        }
        if let Some(api_key) = var("SIEVE_API_KEY") {
            export.api_key = Some(api_key);
        }
        if let Some(token) = var("SIEVE_BEARER_TOKEN") {
            export.bearer_token = Some(token);
        }

        let enrichment = &mut config.pipeline.enrichment;
        if let Some(environment) = var("SIEVE_ENVIRONMENT") {
            enrichment.environment = Some(environment);
        }
        if let Some(hostname) = var("SIEVE_HOSTNAME") {
            enrichment.hostname = Some(hostname);
        }

        Ok(config)
    }

    /// Returns the socket address for binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the host and port do not form a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8686,
            pipeline: PipelineConfig::default(),
            log_format: LogFormat::Text,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

//! Delivery of export requests to the collector.

use super::{ExportError, ExportRequest};
use crate::config::{ExportConfig, Protocol};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Certificate, Client};

/// Telemetry signal carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Metric data points.
    Metrics,
    /// Log records.
    Logs,
    /// Trace spans.
    Traces,
}

impl Signal {
    /// Returns the collector path for this signal.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Metrics => "/v1/metrics",
            Self::Logs => "/v1/logs",
            Self::Traces => "/v1/traces",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metrics => write!(f, "metrics"),
            Self::Logs => write!(f, "logs"),
            Self::Traces => write!(f, "traces"),
        }
    }
}

/// Sends export requests to a downstream system.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Sends one request and resolves once the receiver has acknowledged
    /// it. Returns the number of bytes put on the wire.
    async fn send(&self, request: &ExportRequest) -> Result<u64, ExportError>;

    /// Releases connections. Called once, after the last send.
    async fn close(&self) {}
}

/// OTLP/HTTP transport posting JSON or binary protobuf bodies.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    protobuf: bool,
}

impl HttpTransport {
    /// Builds a transport from export configuration. Bodies are protobuf
    /// when `config.protocol` is [`Protocol::HttpProtobuf`], JSON otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if a credential is not a valid header value, the CA
    /// file cannot be read or parsed, or the client cannot be built.
    pub fn new(config: &ExportConfig) -> Result<Self, ExportError> {
        let mut headers = HeaderMap::new();

        if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(api_key)
                .map_err(|_| ExportError::InvalidHeader("X-API-Key"))?;
            headers.insert("X-API-Key", value);
        }
        if let Some(token) = config.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ExportError::InvalidHeader("Authorization"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout());

        if config.tls.enabled {
            if let Some(path) = &config.tls.ca_file {
                let pem = std::fs::read(path).map_err(|source| ExportError::CaFile {
                    path: path.clone(),
                    source,
                })?;
                builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
            }
            if config.tls.skip_verify {
                tracing::warn!("TLS certificate verification is disabled");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url(),
            protobuf: config.protocol == Protocol::HttpProtobuf,
        })
    }

    /// Returns the collector base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ExportRequest) -> Result<u64, ExportError> {
        let (body, content_type) = if self.protobuf {
            (request.to_protobuf(), "application/x-protobuf")
        } else {
            (request.to_json()?, "application/json")
        };
        let bytes = body.len() as u64;

        let url = format!("{}{}", self.base_url, request.signal().path());
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(bytes);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ExportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

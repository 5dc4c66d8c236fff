//! OTLP/gRPC transport.

use super::{ExportError, ExportRequest, Transport};
use crate::config::ExportConfig;
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

/// Exports through the generated OTLP service clients over one shared
/// channel.
///
/// The channel connects lazily and reconnects on its own after failures.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    channel: Channel,
    metadata: MetadataMap,
}

impl GrpcTransport {
    /// Builds a transport from export configuration.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URI, a credential is
    /// not a valid metadata value, or the CA file cannot be read.
    pub fn new(config: &ExportConfig) -> Result<Self, ExportError> {
        let mut metadata = MetadataMap::new();
        if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value: AsciiMetadataValue = api_key
                .parse()
                .map_err(|_| ExportError::InvalidHeader("X-API-Key"))?;
            metadata.insert("x-api-key", value);
        }
        if let Some(token) = config.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            let value: AsciiMetadataValue = format!("Bearer {token}")
                .parse()
                .map_err(|_| ExportError::InvalidHeader("Authorization"))?;
            metadata.insert("authorization", value);
        }

        let base_url = config.base_url();
        let mut endpoint = Endpoint::from_shared(base_url.clone())?
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout());

        if config.tls.enabled || base_url.starts_with("https://") {
            let mut tls = ClientTlsConfig::new().with_webpki_roots();
            if let Some(path) = &config.tls.ca_file {
                let pem = std::fs::read(path).map_err(|source| ExportError::CaFile {
                    path: path.clone(),
                    source,
                })?;
                tls = tls.ca_certificate(Certificate::from_pem(pem));
            }
            endpoint = endpoint.tls_config(tls)?;
        }

        Ok(Self {
            channel: endpoint.connect_lazy(),
            metadata,
        })
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = self.metadata.clone();
        request
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, request: &ExportRequest) -> Result<u64, ExportError> {
        let bytes = request.protobuf_len() as u64;
        let signal = request.signal();

        let rejected = match request.clone() {
            ExportRequest::Metrics(message) => MetricsServiceClient::new(self.channel.clone())
                .export(self.request(message))
                .await?
                .into_inner()
                .partial_success
                .map(|p| (p.rejected_data_points, p.error_message)),
            ExportRequest::Logs(message) => LogsServiceClient::new(self.channel.clone())
                .export(self.request(message))
                .await?
                .into_inner()
                .partial_success
                .map(|p| (p.rejected_log_records, p.error_message)),
            ExportRequest::Traces(message) => TraceServiceClient::new(self.channel.clone())
                .export(self.request(message))
                .await?
                .into_inner()
                .partial_success
                .map(|p| (p.rejected_spans, p.error_message)),
        };

        if let Some((count, message)) = rejected.filter(|(count, _)| *count > 0) {
            tracing::warn!(%signal, rejected = count, %message, "Collector rejected part of a batch");
        }
        Ok(bytes)
    }
}

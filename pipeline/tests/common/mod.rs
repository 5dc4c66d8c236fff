//! Common helpers for pipeline integration tests.
//!
//! Provides a transport that keeps every export request it receives and
//! helpers to pull the OTLP records back out of them.

use async_trait::async_trait;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::logs::v1::LogRecord;
use opentelemetry_proto::tonic::metrics::v1::{metric, number_data_point, Metric, NumberDataPoint};
use opentelemetry_proto::tonic::trace::v1::Span;
use pipeline::exporter::{ExportError, ExportRequest, Transport};
use pipeline::{Pipeline, PipelineConfig};
use std::sync::{Arc, Mutex};

/// Transport that keeps every delivered request in memory.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<ExportRequest>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: &ExportRequest) -> Result<u64, ExportError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(request.protobuf_len() as u64)
    }
}

impl RecordingTransport {
    /// Returns every exported OTLP metric.
    pub fn metrics(&self) -> Vec<Metric> {
        let mut out = Vec::new();
        for request in self.requests.lock().unwrap().iter() {
            if let ExportRequest::Metrics(request) = request {
                for resource in &request.resource_metrics {
                    for scope in &resource.scope_metrics {
                        out.extend(scope.metrics.iter().cloned());
                    }
                }
            }
        }
        out
    }

    /// Returns every exported OTLP log record.
    pub fn logs(&self) -> Vec<LogRecord> {
        let mut out = Vec::new();
        for request in self.requests.lock().unwrap().iter() {
            if let ExportRequest::Logs(request) = request {
                for resource in &request.resource_logs {
                    for scope in &resource.scope_logs {
                        out.extend(scope.log_records.iter().cloned());
                    }
                }
            }
        }
        out
    }

    /// Returns every exported OTLP span.
    pub fn spans(&self) -> Vec<Span> {
        let mut out = Vec::new();
        for request in self.requests.lock().unwrap().iter() {
            if let ExportRequest::Traces(request) = request {
                for resource in &request.resource_spans {
                    for scope in &resource.scope_spans {
                        out.extend(scope.spans.iter().cloned());
                    }
                }
            }
        }
        out
    }

    /// Returns the exported value of the metric named `name`, if any.
    pub fn metric_value(&self, name: &str) -> Option<f64> {
        let metric = self.metrics().into_iter().find(|m| m.name == name)?;
        match point(&metric)?.value? {
            number_data_point::Value::AsDouble(value) => Some(value),
            number_data_point::Value::AsInt(value) => Some(value as f64),
        }
    }
}

/// Returns the single data point of a gauge or sum.
pub fn point(metric: &Metric) -> Option<&NumberDataPoint> {
    match metric.data.as_ref()? {
        metric::Data::Gauge(gauge) => gauge.data_points.first(),
        metric::Data::Sum(sum) => sum.data_points.first(),
        _ => None,
    }
}

fn string(value: Option<&AnyValue>) -> Option<&str> {
    match value?.value.as_ref()? {
        any_value::Value::StringValue(s) => Some(s),
        _ => None,
    }
}

/// Returns the string value of attribute `key`.
pub fn attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| string(kv.value.as_ref()))
}

/// Returns the string body of a log record.
pub fn body(record: &LogRecord) -> Option<&str> {
    string(record.body.as_ref())
}

/// Configuration with host detection and sampling turned off.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.enrichment.add_hostname = false;
    config.enrichment.cloud.enabled = false;
    config.enrichment.kubernetes.enabled = false;
    config.sampling.enabled = false;
    config
}

/// Builds a pipeline delivering into a fresh [`RecordingTransport`].
pub fn test_pipeline(config: PipelineConfig) -> (Arc<Pipeline>, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = Pipeline::with_transport(config, transport.clone()).unwrap();
    (Arc::new(pipeline), transport)
}

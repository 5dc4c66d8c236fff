//! OTLP encoding of export batches.
//!
//! Batches become the collector service requests generated by
//! `opentelemetry-proto`. The transport decides the wire form: OTLP/JSON,
//! binary protobuf, or a gRPC call. Records that cannot be represented are
//! skipped and counted; the rest of the batch is still encoded.

use super::{Batch, Signal};
use crate::models::{LogRecord, Metric, MetricType, Span};
use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::logs::v1 as logs;
use opentelemetry_proto::tonic::metrics::v1 as metrics;
use opentelemetry_proto::tonic::trace::v1 as trace;
use prost::Message;
use serde::Serialize;
use std::collections::HashMap;

const SCOPE_NAME: &str = "sieve";

/// A typed OTLP export request for one signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExportRequest {
    /// `ExportMetricsServiceRequest`.
    Metrics(ExportMetricsServiceRequest),
    /// `ExportLogsServiceRequest`.
    Logs(ExportLogsServiceRequest),
    /// `ExportTraceServiceRequest`.
    Traces(ExportTraceServiceRequest),
}

impl ExportRequest {
    /// Returns the signal carried by this request.
    #[must_use]
    pub const fn signal(&self) -> Signal {
        match self {
            Self::Metrics(_) => Signal::Metrics,
            Self::Logs(_) => Signal::Logs,
            Self::Traces(_) => Signal::Traces,
        }
    }

    /// Serializes the request with the OTLP/JSON mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Serializes the request as binary protobuf.
    #[must_use]
    pub fn to_protobuf(&self) -> Vec<u8> {
        match self {
            Self::Metrics(request) => request.encode_to_vec(),
            Self::Logs(request) => request.encode_to_vec(),
            Self::Traces(request) => request.encode_to_vec(),
        }
    }

    /// Size of the protobuf encoding, in bytes.
    #[must_use]
    pub fn protobuf_len(&self) -> usize {
        match self {
            Self::Metrics(request) => request.encoded_len(),
            Self::Logs(request) => request.encoded_len(),
            Self::Traces(request) => request.encoded_len(),
        }
    }
}

/// An encoded batch ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    /// The export request.
    pub request: ExportRequest,
    /// Records included in the request.
    pub records: usize,
    /// Records skipped because they could not be encoded.
    pub skipped: usize,
}

fn string_value(value: &str) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::StringValue(value.to_owned())),
    }
}

fn attributes(map: &HashMap<String, String>) -> Vec<KeyValue> {
    let mut attrs: Vec<KeyValue> = map
        .iter()
        .map(|(key, value)| KeyValue {
            key: key.clone(),
            value: Some(string_value(value)),
        })
        .collect();
    attrs.sort_by(|a, b| a.key.cmp(&b.key));
    attrs
}

/// Nanoseconds since the epoch. Times before 1970 cannot be represented.
fn unix_nanos(timestamp: DateTime<Utc>) -> Option<u64> {
    timestamp
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
}

/// Hex identifiers are decoded; anything else is carried as its UTF-8 bytes.
fn id_bytes(id: &str) -> Vec<u8> {
    hex::decode(id).unwrap_or_else(|_| id.as_bytes().to_vec())
}

fn scope() -> Option<InstrumentationScope> {
    Some(InstrumentationScope {
        name: SCOPE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    })
}

fn encode_metric(metric: &Metric) -> Option<metrics::Metric> {
    if !metric.value.is_finite() {
        return None;
    }
    let point = metrics::NumberDataPoint {
        attributes: attributes(&metric.labels),
        time_unix_nano: unix_nanos(metric.timestamp)?,
        value: Some(metrics::number_data_point::Value::AsDouble(metric.value)),
        ..Default::default()
    };

    let data = match metric.metric_type {
        // Counters carry running totals.
        MetricType::Counter => metrics::metric::Data::Sum(metrics::Sum {
            data_points: vec![point],
            aggregation_temporality: metrics::AggregationTemporality::Cumulative as i32,
            is_monotonic: true,
        }),
        MetricType::Gauge | MetricType::Histogram | MetricType::Summary => {
            metrics::metric::Data::Gauge(metrics::Gauge {
                data_points: vec![point],
            })
        }
    };

    Some(metrics::Metric {
        name: metric.name.clone(),
        unit: metric.unit.clone().unwrap_or_default(),
        data: Some(data),
        ..Default::default()
    })
}

fn encode_log(record: &LogRecord) -> Option<logs::LogRecord> {
    let id = |id: Option<&str>| id.filter(|id| !id.is_empty()).map(id_bytes).unwrap_or_default();
    Some(logs::LogRecord {
        time_unix_nano: unix_nanos(record.timestamp)?,
        severity_number: record.severity.otlp_number(),
        severity_text: record.severity.as_text().to_string(),
        body: Some(string_value(&record.body)),
        attributes: attributes(&record.attributes),
        trace_id: id(record.trace_id.as_deref()),
        span_id: id(record.span_id.as_deref()),
        ..Default::default()
    })
}

fn encode_span(span: &Span) -> Option<trace::Span> {
    if span.trace_id.is_empty() || span.span_id.is_empty() {
        return None;
    }
    Some(trace::Span {
        trace_id: id_bytes(&span.trace_id),
        span_id: id_bytes(&span.span_id),
        parent_span_id: span
            .parent_span_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(id_bytes)
            .unwrap_or_default(),
        name: span.name.clone(),
        start_time_unix_nano: unix_nanos(span.start_time)?,
        end_time_unix_nano: unix_nanos(span.end_time())?,
        attributes: attributes(&span.attributes),
        status: Some(trace::Status {
            code: span.status.otlp_code(),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn collect<T, U>(records: &[T], encode: impl Fn(&T) -> Option<U>) -> (Vec<U>, usize) {
    let encoded: Vec<U> = records.iter().filter_map(encode).collect();
    let skipped = records.len() - encoded.len();
    (encoded, skipped)
}

/// Converts a batch into an OTLP export request.
///
/// Records that cannot be represented (non-finite values, timestamps
/// before the epoch, spans without identifiers) are skipped and reported in
/// [`EncodedBatch::skipped`].
#[must_use]
pub fn encode(batch: &Batch) -> EncodedBatch {
    let (request, records, skipped) = match batch {
        Batch::Metrics(items) => {
            let (encoded, skipped) = collect(items, encode_metric);
            let records = encoded.len();
            let request = ExportMetricsServiceRequest {
                resource_metrics: vec![metrics::ResourceMetrics {
                    scope_metrics: vec![metrics::ScopeMetrics {
                        scope: scope(),
                        metrics: encoded,
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
            };
            (ExportRequest::Metrics(request), records, skipped)
        }
        Batch::Logs(items) => {
            let (encoded, skipped) = collect(items, encode_log);
            let records = encoded.len();
            let request = ExportLogsServiceRequest {
                resource_logs: vec![logs::ResourceLogs {
                    scope_logs: vec![logs::ScopeLogs {
                        scope: scope(),
                        log_records: encoded,
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
            };
            (ExportRequest::Logs(request), records, skipped)
        }
        Batch::Spans(items) => {
            let (encoded, skipped) = collect(items, encode_span);
            let records = encoded.len();
            let request = ExportTraceServiceRequest {
                resource_spans: vec![trace::ResourceSpans {
                    scope_spans: vec![trace::ScopeSpans {
                        scope: scope(),
                        spans: encoded,
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
            };
            (ExportRequest::Traces(request), records, skipped)
        }
    };

    EncodedBatch {
        request,
        records,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, SpanStatus};
    use chrono::TimeZone;
    use opentelemetry_proto::tonic::metrics::v1::metric::Data;
    use opentelemetry_proto::tonic::metrics::v1::number_data_point::Value as PointValue;
    use serde_json::Value;
    use std::time::Duration;

    fn only_metrics(encoded: &EncodedBatch) -> &[metrics::Metric] {
        match &encoded.request {
            ExportRequest::Metrics(request) => &request.resource_metrics[0].scope_metrics[0].metrics,
            other => panic!("expected metrics, got {:?}", other.signal()),
        }
    }

    #[test]
    fn test_encode_gauge_and_counter() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let batch = Batch::Metrics(vec![
            Metric::gauge("cpu.usage", 0.5)
                .with_label("host", "a")
                .with_unit("1")
                .with_timestamp(ts),
            Metric::counter("requests", 10.0).with_timestamp(ts),
        ]);

        let encoded = encode(&batch);
        assert_eq!(encoded.records, 2);
        assert_eq!(encoded.skipped, 0);

        let metrics = only_metrics(&encoded);
        assert_eq!(metrics[0].name, "cpu.usage");
        assert_eq!(metrics[0].unit, "1");
        let Some(Data::Gauge(gauge)) = &metrics[0].data else {
            panic!("cpu.usage should be a gauge");
        };
        let point = &gauge.data_points[0];
        assert_eq!(point.value, Some(PointValue::AsDouble(0.5)));
        assert_eq!(point.time_unix_nano, 1_700_000_000_000_000_000);
        assert_eq!(point.attributes[0].key, "host");

        let Some(Data::Sum(sum)) = &metrics[1].data else {
            panic!("requests should be a sum");
        };
        assert!(sum.is_monotonic);
        assert_eq!(
            sum.aggregation_temporality,
            metrics::AggregationTemporality::Cumulative as i32
        );
    }

    #[test]
    fn test_unrepresentable_metrics_skipped() {
        let batch = Batch::Metrics(vec![
            Metric::gauge("ok", 1.0),
            Metric::gauge("nan", f64::NAN),
            Metric::gauge("inf", f64::INFINITY),
            Metric::gauge("old", 1.0).with_timestamp(Utc.timestamp_opt(-60, 0).unwrap()),
        ]);

        let encoded = encode(&batch);
        assert_eq!(encoded.records, 1);
        assert_eq!(encoded.skipped, 3);
    }

    #[test]
    fn test_encode_log() {
        let batch = Batch::Logs(vec![LogRecord::new(Severity::Warn, "disk almost full")
            .with_attribute("mount", "/var")
            .with_trace_id("4bf92f3577b34da6a3ce929d0e0e4736")]);

        let ExportRequest::Logs(request) = encode(&batch).request else {
            panic!("expected logs");
        };
        let record = &request.resource_logs[0].scope_logs[0].log_records[0];
        assert_eq!(record.severity_number, 13);
        assert_eq!(record.severity_text, "WARN");
        assert_eq!(record.body, Some(string_value("disk almost full")));
        assert_eq!(record.trace_id.len(), 16);
        assert!(record.span_id.is_empty());
    }

    #[test]
    fn test_encode_span() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let batch = Batch::Spans(vec![
            Span::new("trace-1", "00f067aa0ba902b7", "GET /users")
                .with_parent("span-0")
                .with_start_time(start)
                .with_duration(Duration::from_millis(250))
                .with_status(SpanStatus::Error),
            Span::new("", "span-2", "orphan"),
        ]);

        let encoded = encode(&batch);
        assert_eq!(encoded.records, 1);
        assert_eq!(encoded.skipped, 1);

        let ExportRequest::Traces(request) = encoded.request else {
            panic!("expected traces");
        };
        let span = &request.resource_spans[0].scope_spans[0].spans[0];
        assert_eq!(span.trace_id, b"trace-1".to_vec());
        assert_eq!(span.span_id, vec![0x00, 0xf0, 0x67, 0xaa, 0x0b, 0xa9, 0x02, 0xb7]);
        assert_eq!(span.parent_span_id, b"span-0".to_vec());
        assert_eq!(span.start_time_unix_nano, 1_700_000_000_000_000_000);
        assert_eq!(span.end_time_unix_nano, 1_700_000_000_250_000_000);
        assert_eq!(span.status.as_ref().map(|s| s.code), Some(2));
    }

    #[test]
    fn test_json_uses_otlp_field_names() {
        let encoded = encode(&Batch::Metrics(vec![Metric::gauge("temp", 21.5)]));
        let json: Value = serde_json::from_slice(&encoded.request.to_json().unwrap()).unwrap();

        let metric = &json["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0];
        assert_eq!(metric["name"], "temp");
        assert_eq!(metric["gauge"]["dataPoints"][0]["asDouble"], 21.5);
        assert_eq!(json["resourceMetrics"][0]["scopeMetrics"][0]["scope"]["name"], SCOPE_NAME);
    }

    #[test]
    fn test_protobuf_round_trips_through_prost() {
        let encoded = encode(&Batch::Logs(vec![LogRecord::new(Severity::Error, "boom")]));
        let bytes = encoded.request.to_protobuf();
        assert_eq!(bytes.len(), encoded.request.protobuf_len());

        let decoded = ExportLogsServiceRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(ExportRequest::Logs(decoded), encoded.request);
    }
}

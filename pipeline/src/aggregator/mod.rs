//! Windowed aggregation of metrics and log deduplication.
//!
//! Metric values are accumulated per `(name, labels)` bucket and reduced to
//! the configured aggregates on flush. Log records are grouped by their
//! normalised template; repeated templates are emitted once with a count.
//!
//! Both flushes swap state out under the lock and do the reduction work
//! after releasing it, so producers only contend for the length of a swap.

pub mod template;

use crate::config::{AggregateFunction, AggregationConfig};
use crate::models::{LogRecord, Metric, MetricType};
use chrono::{DateTime, SecondsFormat, Utc};
use fnv::FnvHashMap;
use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Attribute carrying the number of records a grouped log stands for.
pub const AGGREGATED_COUNT_ATTR: &str = "aggregated_count";
/// Attribute carrying the template of a grouped log.
pub const PATTERN_TEMPLATE_ATTR: &str = "pattern_template";
/// Attribute carrying the timestamp of the first record in a group.
pub const FIRST_SEEN_ATTR: &str = "aggregated_first_seen";
/// Attribute carrying the timestamp of the last record in a group.
pub const LAST_SEEN_ATTR: &str = "aggregated_last_seen";

/// Returns the `p`-th percentile (`0..=100`) of sorted values using linear
/// interpolation between the two nearest ranks.
///
/// Returns `None` for an empty slice.
///
/// ```
/// use pipeline::aggregator::percentile;
///
/// let values = [10.0, 20.0, 30.0, 40.0, 50.0];
/// assert_eq!(percentile(&values, 50.0), Some(30.0));
///
/// let p90 = percentile(&values, 90.0).unwrap();
/// assert!((p90 - 46.0).abs() < 1e-9);
/// ```
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let index = (p / 100.0).clamp(0.0, 1.0) * last as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    let fraction = index - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Computes one aggregate over sorted values.
#[allow(clippy::cast_precision_loss)]
fn compute(function: AggregateFunction, sorted: &[f64]) -> Option<f64> {
    let first = *sorted.first()?;
    let last = *sorted.last()?;
    let sum = || sorted.iter().sum::<f64>();
    Some(match function {
        AggregateFunction::Min => first,
        AggregateFunction::Max => last,
        AggregateFunction::Sum => sum(),
        AggregateFunction::Count => sorted.len() as f64,
        AggregateFunction::Avg => sum() / sorted.len() as f64,
        AggregateFunction::Percentile(p) => return percentile(sorted, p),
    })
}

/// Series identity: the metric name and its sorted label pairs.
type BucketKey = (String, Vec<(String, String)>);

fn bucket_key(metric: &Metric) -> BucketKey {
    let labels = metric
        .sorted_labels()
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    (metric.name.clone(), labels)
}

#[derive(Debug)]
struct MetricBucket {
    name: String,
    labels: HashMap<String, String>,
    metric_type: MetricType,
    unit: Option<String>,
    values: Vec<f64>,
    last_update: DateTime<Utc>,
}

/// Values swapped out of a bucket on flush.
struct BucketSnapshot {
    name: String,
    labels: HashMap<String, String>,
    metric_type: MetricType,
    unit: Option<String>,
    values: Vec<f64>,
    last_update: DateTime<Utc>,
}

#[derive(Debug)]
struct LogGroup {
    template: String,
    count: u64,
    sample: LogRecord,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LogWindow {
    groups: FnvHashMap<String, LogGroup>,
    overflow: Vec<LogRecord>,
}

/// Cumulative counters of the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct AggregatorStats {
    /// Metric values added.
    pub metrics_in: u64,
    /// Metrics emitted by flushes.
    pub metrics_out: u64,
    /// Log records added.
    pub logs_in: u64,
    /// Log records emitted by flushes.
    pub logs_out: u64,
    /// Buckets currently held.
    pub active_buckets: usize,
    /// Log groups in the current window.
    pub active_log_groups: usize,
    /// `1 - output / input` over all records, `0` before any input.
    pub reduction_ratio: f64,
}

/// Reduces metrics and logs over fixed windows.
#[derive(Debug)]
pub struct Aggregator {
    config: AggregationConfig,
    buckets: Mutex<FnvHashMap<BucketKey, MetricBucket>>,
    logs: Mutex<LogWindow>,
    metrics_in: AtomicU64,
    metrics_out: AtomicU64,
    logs_in: AtomicU64,
    logs_out: AtomicU64,
}

impl Aggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(FnvHashMap::default()),
            logs: Mutex::new(LogWindow::default()),
            metrics_in: AtomicU64::new(0),
            metrics_out: AtomicU64::new(0),
            logs_in: AtomicU64::new(0),
            logs_out: AtomicU64::new(0),
        }
    }

    /// Returns the aggregation configuration.
    #[must_use]
    pub const fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Appends a metric value to its bucket.
    pub fn add_metric(&self, metric: Metric) {
        let key = bucket_key(&metric);
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        match buckets.get_mut(&key) {
            Some(bucket) => {
                bucket.values.push(metric.value);
                bucket.last_update = bucket.last_update.max(metric.timestamp);
            }
            None => {
                buckets.insert(
                    key,
                    MetricBucket {
                        values: vec![metric.value],
                        last_update: metric.timestamp,
                        name: metric.name,
                        labels: metric.labels,
                        metric_type: metric.metric_type,
                        unit: metric.unit,
                    },
                );
            }
        }
        drop(buckets);

        self.metrics_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a log record to its template group.
    ///
    /// Does nothing when log grouping is disabled.
    pub fn add_log(&self, record: LogRecord) {
        if !self.config.group_similar_logs {
            return;
        }

        let template = template::normalize(&record.body);
        let timestamp = record.timestamp;
        let mut window = self.logs.lock().unwrap_or_else(PoisonError::into_inner);

        let key = if window.groups.contains_key(&template) {
            Some(template)
        } else if let Some(similar) = self.find_similar(&window.groups, &template) {
            Some(similar)
        } else if window.groups.len() < self.config.max_log_patterns {
            window.groups.insert(
                template.clone(),
                LogGroup {
                    template: template.clone(),
                    count: 0,
                    sample: record.clone(),
                    first_seen: timestamp,
                    last_seen: timestamp,
                },
            );
            Some(template)
        } else {
            None
        };

        let grouped = match key.as_ref().and_then(|k| window.groups.get_mut(k)) {
            Some(group) => {
                group.count += 1;
                group.first_seen = group.first_seen.min(timestamp);
                group.last_seen = group.last_seen.max(timestamp);
                true
            }
            None => false,
        };
        if !grouped {
            window.overflow.push(record);
        }
        drop(window);

        self.logs_in.fetch_add(1, Ordering::Relaxed);
    }

    fn find_similar(
        &self,
        groups: &FnvHashMap<String, LogGroup>,
        template: &str,
    ) -> Option<String> {
        let threshold = self.config.similarity_threshold;
        if threshold >= 1.0 {
            return None;
        }
        groups
            .keys()
            .find(|existing| template::similarity(existing, template) >= threshold)
            .cloned()
    }

    /// Reduces every bucket to its aggregates and starts a new window.
    ///
    /// Buckets that received no value since the previous flush are evicted;
    /// the rest keep their allocation for the next window.
    #[must_use]
    pub fn flush(&self) -> Vec<Metric> {
        let snapshots: Vec<BucketSnapshot> = {
            let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
            buckets.retain(|_, bucket| !bucket.values.is_empty());
            buckets
                .values_mut()
                .map(|bucket| {
                    let capacity = bucket.values.capacity();
                    BucketSnapshot {
                        name: bucket.name.clone(),
                        labels: bucket.labels.clone(),
                        metric_type: bucket.metric_type,
                        unit: bucket.unit.clone(),
                        values: mem::replace(&mut bucket.values, Vec::with_capacity(capacity)),
                        last_update: bucket.last_update,
                    }
                })
                .collect()
        };

        let mut output = Vec::with_capacity(snapshots.len() * (self.config.aggregates.len() + 1));
        for snapshot in snapshots {
            self.reduce(snapshot, &mut output);
        }

        self.metrics_out
            .fetch_add(output.len() as u64, Ordering::Relaxed);
        tracing::debug!(metrics = output.len(), "Flushed metric aggregates");
        output
    }

    fn reduce(&self, mut snapshot: BucketSnapshot, output: &mut Vec<Metric>) {
        // Read the raw value in arrival order; the sort below reorders values.
        let Some(&raw) = snapshot.values.last() else {
            return;
        };
        snapshot.values.sort_by(f64::total_cmp);

        for &function in &self.config.aggregates {
            if let Some(value) = compute(function, &snapshot.values) {
                output.push(Metric {
                    name: format!("{}.{}", snapshot.name, function.suffix()),
                    value,
                    timestamp: snapshot.last_update,
                    labels: snapshot.labels.clone(),
                    metric_type: MetricType::Gauge,
                    unit: snapshot.unit.clone(),
                });
            }
        }

        if !self.config.drop_raw_metrics {
            output.push(Metric {
                name: snapshot.name,
                value: raw,
                timestamp: snapshot.last_update,
                labels: snapshot.labels,
                metric_type: snapshot.metric_type,
                unit: snapshot.unit,
            });
        }
    }

    /// Emits the current window's log groups and starts a new window.
    ///
    /// Groups seen more than once are emitted as their first record with
    /// count, template and time-range attributes. Single records pass
    /// through unmodified.
    #[must_use]
    pub fn flush_logs(&self) -> Vec<LogRecord> {
        let window = mem::take(&mut *self.logs.lock().unwrap_or_else(PoisonError::into_inner));

        let mut groups: Vec<LogGroup> = window.groups.into_values().collect();
        groups.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.template.cmp(&b.template))
        });

        let mut output: Vec<LogRecord> = groups
            .into_iter()
            .map(|group| {
                if group.count <= 1 {
                    return group.sample;
                }
                let mut record = group.sample;
                record
                    .attributes
                    .insert(AGGREGATED_COUNT_ATTR.to_string(), group.count.to_string());
                record
                    .attributes
                    .insert(PATTERN_TEMPLATE_ATTR.to_string(), group.template);
                record.attributes.insert(
                    FIRST_SEEN_ATTR.to_string(),
                    group.first_seen.to_rfc3339_opts(SecondsFormat::Millis, true),
                );
                record.attributes.insert(
                    LAST_SEEN_ATTR.to_string(),
                    group.last_seen.to_rfc3339_opts(SecondsFormat::Millis, true),
                );
                record
            })
            .collect();
        output.extend(window.overflow);

        self.logs_out.fetch_add(output.len() as u64, Ordering::Relaxed);
        tracing::debug!(logs = output.len(), "Flushed log groups");
        output
    }

    /// Returns a snapshot of the aggregator's counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> AggregatorStats {
        let metrics_in = self.metrics_in.load(Ordering::Relaxed);
        let metrics_out = self.metrics_out.load(Ordering::Relaxed);
        let logs_in = self.logs_in.load(Ordering::Relaxed);
        let logs_out = self.logs_out.load(Ordering::Relaxed);

        let input = metrics_in + logs_in;
        let reduction_ratio = if input == 0 {
            0.0
        } else {
            1.0 - (metrics_out + logs_out) as f64 / input as f64
        };

        AggregatorStats {
            metrics_in,
            metrics_out,
            logs_in,
            logs_out,
            active_buckets: self
                .buckets
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            active_log_groups: self
                .logs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .groups
                .len(),
            reduction_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use chrono::Duration;

    fn config(aggregates: Vec<AggregateFunction>, drop_raw: bool) -> AggregationConfig {
        AggregationConfig {
            aggregates,
            drop_raw_metrics: drop_raw,
            ..AggregationConfig::default()
        }
    }

    fn value_of(metrics: &[Metric], name: &str) -> f64 {
        metrics
            .iter()
            .find(|m| m.name == name)
            .unwrap_or_else(|| panic!("missing {name}"))
            .value
    }

    #[test]
    fn test_percentile_interpolation() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];
        let p = |q: f64| percentile(&values, q).unwrap();

        assert!((p(50.0) - 30.0).abs() < 1e-9);
        assert!((p(80.0) - 42.0).abs() < 1e-9);
        assert!((p(90.0) - 46.0).abs() < 1e-9);
        assert!((p(0.0) - 10.0).abs() < 1e-9);
        assert!((p(100.0) - 50.0).abs() < 1e-9);
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(percentile(&[7.0], 99.0), Some(7.0));
    }

    #[test]
    fn test_flush_computes_aggregates() {
        let aggregator = Aggregator::new(config(
            vec![
                AggregateFunction::Min,
                AggregateFunction::Max,
                AggregateFunction::Sum,
                AggregateFunction::Count,
                AggregateFunction::Avg,
                AggregateFunction::Percentile(50.0),
            ],
            true,
        ));

        for v in [30.0, 10.0, 50.0, 20.0, 40.0] {
            aggregator.add_metric(Metric::gauge("latency", v).with_label("svc", "api"));
        }
        let out = aggregator.flush();

        assert_eq!(out.len(), 6);
        assert!((value_of(&out, "latency.min") - 10.0).abs() < f64::EPSILON);
        assert!((value_of(&out, "latency.max") - 50.0).abs() < f64::EPSILON);
        assert!((value_of(&out, "latency.sum") - 150.0).abs() < f64::EPSILON);
        assert!((value_of(&out, "latency.count") - 5.0).abs() < f64::EPSILON);
        assert!((value_of(&out, "latency.avg") - 30.0).abs() < f64::EPSILON);
        assert!((value_of(&out, "latency.p50") - 30.0).abs() < f64::EPSILON);
        assert!(out.iter().all(|m| m.metric_type == MetricType::Gauge));
        assert!(out.iter().all(|m| m.labels["svc"] == "api"));
    }

    #[test]
    fn test_raw_value_kept_when_not_dropped() {
        let aggregator = Aggregator::new(config(vec![AggregateFunction::Max], false));

        aggregator.add_metric(Metric::counter("requests", 5.0));
        aggregator.add_metric(Metric::counter("requests", 3.0));
        let out = aggregator.flush();

        assert_eq!(out.len(), 2);
        let raw = out.iter().find(|m| m.name == "requests").unwrap();
        assert!((raw.value - 3.0).abs() < f64::EPSILON);
        assert_eq!(raw.metric_type, MetricType::Counter);
    }

    #[test]
    fn test_series_are_bucketed_separately() {
        let aggregator = Aggregator::new(config(vec![AggregateFunction::Count], true));

        aggregator.add_metric(Metric::gauge("cpu", 1.0).with_label("core", "0"));
        aggregator.add_metric(Metric::gauge("cpu", 1.0).with_label("core", "1"));
        aggregator.add_metric(Metric::gauge("cpu", 1.0).with_label("core", "1"));

        let mut counts: Vec<(String, f64)> = aggregator
            .flush()
            .into_iter()
            .map(|m| (m.labels["core"].clone(), m.value))
            .collect();
        counts.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(counts, vec![("0".to_string(), 1.0), ("1".to_string(), 2.0)]);
    }

    #[test]
    fn test_separator_characters_do_not_merge_series() {
        let aggregator = Aggregator::new(config(vec![AggregateFunction::Count], true));

        aggregator.add_metric(Metric::gauge("m", 1.0).with_label("a=b", "c"));
        aggregator.add_metric(Metric::gauge("m", 1.0).with_label("a", "b=c"));
        aggregator.add_metric(Metric::gauge("m", 1.0).with_label("a\u{1f}x", "y"));

        let out = aggregator.flush();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|m| (m.value - 1.0).abs() < f64::EPSILON));
        assert!(out.iter().any(|m| m.labels.get("a=b").map(String::as_str) == Some("c")));
        assert!(out.iter().any(|m| m.labels.get("a").map(String::as_str) == Some("b=c")));
    }

    #[test]
    fn test_window_does_not_leak_into_next_flush() {
        let aggregator = Aggregator::new(config(vec![AggregateFunction::Count], true));

        aggregator.add_metric(Metric::gauge("m", 1.0));
        aggregator.add_metric(Metric::gauge("m", 1.0));
        assert!((aggregator.flush()[0].value - 2.0).abs() < f64::EPSILON);

        aggregator.add_metric(Metric::gauge("m", 1.0));
        assert!((aggregator.flush()[0].value - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_idle_buckets_are_evicted() {
        let aggregator = Aggregator::new(config(vec![AggregateFunction::Count], true));

        aggregator.add_metric(Metric::gauge("m", 1.0));
        let _ = aggregator.flush();
        assert_eq!(aggregator.stats().active_buckets, 1);

        assert!(aggregator.flush().is_empty());
        assert_eq!(aggregator.stats().active_buckets, 0);
    }

    #[test]
    fn test_log_grouping() {
        let aggregator = Aggregator::new(AggregationConfig::default());
        let start = Utc::now();

        aggregator.add_log(
            LogRecord::new(Severity::Error, "Connection timeout to 10.0.0.5:5432")
                .with_timestamp(start),
        );
        aggregator.add_log(
            LogRecord::new(Severity::Error, "Connection timeout to 10.0.0.9:5432")
                .with_timestamp(start + Duration::seconds(3)),
        );
        aggregator.add_log(LogRecord::new(Severity::Info, "service started"));

        let out = aggregator.flush_logs();
        assert_eq!(out.len(), 2);

        let grouped = out
            .iter()
            .find(|r| r.attributes.contains_key(AGGREGATED_COUNT_ATTR))
            .unwrap();
        assert_eq!(grouped.attributes[AGGREGATED_COUNT_ATTR], "2");
        assert_eq!(
            grouped.attributes[PATTERN_TEMPLATE_ATTR],
            "Connection timeout to <IP>"
        );
        assert_eq!(grouped.body, "Connection timeout to 10.0.0.5:5432");
        assert!(grouped.attributes.contains_key(FIRST_SEEN_ATTR));
        assert!(grouped.attributes.contains_key(LAST_SEEN_ATTR));

        let single = out.iter().find(|r| r.body == "service started").unwrap();
        assert!(single.attributes.is_empty());

        assert!(aggregator.flush_logs().is_empty());
    }

    #[test]
    fn test_log_grouping_disabled_is_noop() {
        let aggregator = Aggregator::new(AggregationConfig {
            group_similar_logs: false,
            ..AggregationConfig::default()
        });
        aggregator.add_log(LogRecord::new(Severity::Info, "x"));

        assert!(aggregator.flush_logs().is_empty());
        assert_eq!(aggregator.stats().logs_in, 0);
    }

    #[test]
    fn test_similarity_threshold_merges_templates() {
        let aggregator = Aggregator::new(AggregationConfig {
            similarity_threshold: 0.75,
            ..AggregationConfig::default()
        });

        aggregator.add_log(LogRecord::new(Severity::Warn, "cache miss for users"));
        aggregator.add_log(LogRecord::new(Severity::Warn, "cache miss for orders"));

        let out = aggregator.flush_logs();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].attributes[AGGREGATED_COUNT_ATTR], "2");
    }

    #[test]
    fn test_pattern_cap_passes_overflow_through() {
        let aggregator = Aggregator::new(AggregationConfig {
            max_log_patterns: 1,
            ..AggregationConfig::default()
        });

        aggregator.add_log(LogRecord::new(Severity::Info, "alpha"));
        aggregator.add_log(LogRecord::new(Severity::Info, "beta"));
        aggregator.add_log(LogRecord::new(Severity::Info, "beta"));
        aggregator.add_log(LogRecord::new(Severity::Info, "alpha"));

        let out = aggregator.flush_logs();
        assert_eq!(out.len(), 3);
        assert_eq!(
            out.iter().filter(|r| r.body == "beta").count(),
            2,
            "overflowed records pass through individually"
        );
    }

    #[test]
    fn test_reduction_ratio() {
        let aggregator = Aggregator::new(config(vec![AggregateFunction::Avg], true));
        assert!(aggregator.stats().reduction_ratio.abs() < f64::EPSILON);

        for i in 0..10 {
            aggregator.add_metric(Metric::gauge("m", f64::from(i)));
        }
        let _ = aggregator.flush();

        let stats = aggregator.stats();
        assert_eq!(stats.metrics_in, 10);
        assert_eq!(stats.metrics_out, 1);
        assert!((stats.reduction_ratio - 0.9).abs() < 1e-9);
    }
}

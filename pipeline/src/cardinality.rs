//! Cardinality control.
//!
//! Bounds the number of distinct label combinations per metric and the
//! number of distinct values per configured label. Observed sets only grow
//! for the lifetime of the process: cardinality here means lifetime
//! uniqueness, not uniqueness within a recent window.

use crate::config::CardinalityConfig;
use crate::models::Metric;
use fnv::{FnvHashMap, FnvHashSet, FnvHasher};
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Value substituted for label values beyond a label's cap.
pub const OVERFLOW_LABEL_VALUE: &str = "__other__";

/// Returns a deterministic 64-bit key for a label set.
///
/// Pairs are hashed in key order, so two maps with the same contents always
/// produce the same key regardless of insertion order.
#[must_use]
pub fn series_key(metric: &Metric) -> u64 {
    let mut hasher = FnvHasher::default();
    for (key, value) in metric.sorted_labels() {
        hasher.write(key.as_bytes());
        hasher.write_u8(0xff);
        hasher.write(value.as_bytes());
        hasher.write_u8(0xfe);
    }
    hasher.finish()
}

#[derive(Debug, Default)]
struct CardinalityState {
    series_per_metric: FnvHashMap<String, FnvHashSet<u64>>,
    label_values: FnvHashMap<String, FnvHashSet<String>>,
}

/// Point-in-time counters of the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CardinalityStats {
    /// Metrics rejected because their metric hit the series cap.
    pub rejected: u64,
    /// Label values rewritten to [`OVERFLOW_LABEL_VALUE`].
    pub bucketed_values: u64,
    /// Labels stripped by a cap of zero.
    pub stripped_labels: u64,
    /// Metric names currently tracked.
    pub tracked_metrics: usize,
}

/// Admits or rejects metrics according to [`CardinalityConfig`].
///
/// # Example
///
/// ```
/// use pipeline::cardinality::CardinalityController;
/// use pipeline::config::CardinalityConfig;
/// use pipeline::models::Metric;
///
/// let controller = CardinalityController::new(CardinalityConfig {
///     max_series_per_metric: 1,
///     ..CardinalityConfig::default()
/// });
///
/// assert!(controller.admit(Metric::gauge("m", 1.0).with_label("pod", "a")).is_some());
/// assert!(controller.admit(Metric::gauge("m", 1.0).with_label("pod", "b")).is_none());
/// ```
#[derive(Debug)]
pub struct CardinalityController {
    config: CardinalityConfig,
    state: Mutex<CardinalityState>,
    rejected: AtomicU64,
    bucketed_values: AtomicU64,
    stripped_labels: AtomicU64,
}

impl CardinalityController {
    /// Creates a controller with empty observation sets.
    #[must_use]
    pub fn new(config: CardinalityConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CardinalityState::default()),
            rejected: AtomicU64::new(0),
            bucketed_values: AtomicU64::new(0),
            stripped_labels: AtomicU64::new(0),
        }
    }

    /// Admits a metric, possibly rewriting its labels.
    ///
    /// Drop-listed labels are removed first. Labels with a configured cap are
    /// then stripped (cap `0`) or have new values beyond the cap rewritten to
    /// [`OVERFLOW_LABEL_VALUE`]. Finally the resulting label set is checked
    /// against the per-metric series cap: series already seen are always
    /// admitted, new series are admitted only while the cap has room.
    ///
    /// Returns `None` when the metric is rejected.
    #[must_use]
    pub fn admit(&self, mut metric: Metric) -> Option<Metric> {
        if !self.config.enabled {
            return Some(metric);
        }

        for label in &self.config.drop_labels {
            metric.labels.remove(label);
        }

        let admitted = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            self.apply_label_caps(&mut state, &mut metric);
            Self::check_series(&mut state, &metric, self.config.max_series_per_metric)
        };

        if let Err(series) = admitted {
            let total = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_power_of_two() {
                tracing::warn!(
                    metric = %metric.name,
                    series,
                    rejected_total = total,
                    "Cardinality limit exceeded, rejecting new series"
                );
            }
            return None;
        }

        Some(metric)
    }

    /// Records the metric's series, or returns the current series count
    /// when the cap leaves no room for a new one.
    fn check_series(
        state: &mut CardinalityState,
        metric: &Metric,
        max_series: usize,
    ) -> Result<(), usize> {
        if max_series == 0 {
            return Ok(());
        }

        let key = series_key(metric);
        let series = state
            .series_per_metric
            .entry(metric.name.clone())
            .or_default();

        if series.contains(&key) {
            return Ok(());
        }
        if series.len() >= max_series {
            return Err(series.len());
        }
        series.insert(key);
        Ok(())
    }

    fn apply_label_caps(&self, state: &mut CardinalityState, metric: &mut Metric) {
        for (label, &cap) in &self.config.max_label_values {
            if cap == 0 {
                if metric.labels.remove(label).is_some() {
                    self.stripped_labels.fetch_add(1, Ordering::Relaxed);
                }
                continue;
            }

            let Some(value) = metric.labels.get_mut(label) else {
                continue;
            };

            let seen = state.label_values.entry(label.clone()).or_default();
            if seen.contains(value.as_str()) {
                continue;
            }
            if seen.len() < cap {
                seen.insert(value.clone());
            } else {
                tracing::debug!(
                    label = %label,
                    value = %value,
                    cap,
                    "Label value cap reached, bucketing value"
                );
                *value = OVERFLOW_LABEL_VALUE.to_string();
                self.bucketed_values.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Returns the number of distinct series admitted for a metric name.
    #[must_use]
    pub fn series_count(&self, metric_name: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .series_per_metric
            .get(metric_name)
            .map_or(0, FnvHashSet::len)
    }

    /// Returns a snapshot of the controller's counters.
    #[must_use]
    pub fn stats(&self) -> CardinalityStats {
        let tracked_metrics = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .series_per_metric
            .len();
        CardinalityStats {
            rejected: self.rejected.load(Ordering::Relaxed),
            bucketed_values: self.bucketed_values.load(Ordering::Relaxed),
            stripped_labels: self.stripped_labels.load(Ordering::Relaxed),
            tracked_metrics,
        }
    }
}

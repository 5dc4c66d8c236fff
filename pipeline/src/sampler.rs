//! Adaptive sampling for spans and log records.
//!
//! Trace verdicts are a pure function of the trace ID and the current rate,
//! so every span of a trace gets the same verdict without coordination. The
//! rate itself is steered by a multiplicative-increase/multiplicative-decrease
//! controller against a byte budget fed by the exporter.

use crate::config::SamplingConfig;
use crate::models::{LogRecord, Severity, Span, SpanStatus};
use fnv::{FnvHashMap, FnvHasher};
use rand::Rng;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Maps a trace ID to a value in `[0, 1)`.
///
/// Uses FNV-1a over the ID bytes followed by a 64-bit finalizer, so short
/// IDs that differ only in their last bytes still spread over the whole
/// range. The top 53 bits fit an `f64` mantissa exactly.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn trace_hash(trace_id: &str) -> f64 {
    let mut hasher = FnvHasher::default();
    hasher.write(trace_id.as_bytes());
    let mut h = hasher.finish();
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    (h >> 11) as f64 / (1u64 << 53) as f64
}

/// Snapshot of the sampler's state.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SamplerStats {
    /// Current controlled trace rate.
    pub current_rate: f64,
    /// Distinct operation names seen so far.
    pub tracked_operations: usize,
    /// Controller ticks that changed the rate.
    pub adjustments: u64,
}

/// Decides which spans and log records are kept.
#[derive(Debug)]
pub struct AdaptiveSampler {
    config: SamplingConfig,
    rate_bits: AtomicU64,
    operation_counts: Mutex<FnvHashMap<String, u64>>,
    exported_bytes: Arc<AtomicU64>,
    adjustments: AtomicU64,
}

impl AdaptiveSampler {
    /// Creates a sampler starting at the configured trace rate.
    #[must_use]
    pub fn new(config: SamplingConfig) -> Self {
        Self::with_byte_counter(config, Arc::new(AtomicU64::new(0)))
    }

    /// Creates a sampler whose controller reads the given byte counter.
    ///
    /// The exporter adds delivered payload sizes to the same counter.
    #[must_use]
    pub fn with_byte_counter(config: SamplingConfig, exported_bytes: Arc<AtomicU64>) -> Self {
        Self {
            rate_bits: AtomicU64::new(config.trace_rate.to_bits()),
            config,
            operation_counts: Mutex::new(FnvHashMap::default()),
            exported_bytes,
            adjustments: AtomicU64::new(0),
        }
    }

    /// Returns the shared exported-bytes counter.
    #[must_use]
    pub fn byte_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.exported_bytes)
    }

    /// Adds exported bytes to the controller's current tick.
    pub fn record_bytes(&self, bytes: u64) {
        self.exported_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Returns the current controlled trace rate.
    #[must_use]
    pub fn current_rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    fn set_rate(&self, rate: f64) {
        self.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }

    /// Decides whether a span is kept.
    ///
    /// Error spans (when enabled) and slow spans are always kept. Otherwise
    /// the trace hash is compared against the current rate, boosted for
    /// operations that have been evaluated only a few times.
    #[must_use]
    pub fn should_sample_span(&self, span: &Span) -> bool {
        if !self.config.enabled {
            return true;
        }

        if self.config.always_sample_errors && span.status == SpanStatus::Error {
            return true;
        }

        if let Some(threshold) = self.config.slow_threshold() {
            if span.duration >= threshold {
                return true;
            }
        }

        let seen = {
            let mut counts = self
                .operation_counts
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let count = counts.entry(span.name.clone()).or_insert(0);
            let seen = *count;
            *count = count.saturating_add(1);
            seen
        };

        let mut rate = self.current_rate();
        if seen < self.config.rare_operation_threshold {
            rate = (rate * self.config.rare_operation_boost).min(1.0);
        }

        trace_hash(&span.trace_id) < rate
    }

    /// Decides whether a log record is kept.
    ///
    /// Error and fatal records are kept when `always_keep_errors` is set,
    /// warn records when `always_keep_warnings` is set. Everything else is a
    /// uniform draw: info and unkept warn/error records at the info rate,
    /// debug and trace records at the debug rate.
    #[must_use]
    pub fn should_sample_log(&self, record: &LogRecord) -> bool {
        if !self.config.enabled {
            return true;
        }

        let rate = match record.severity {
            Severity::Error | Severity::Fatal if self.config.always_keep_errors => return true,
            Severity::Warn if self.config.always_keep_warnings => return true,
            Severity::Info | Severity::Warn | Severity::Error | Severity::Fatal => {
                self.config.log_info_rate
            }
            Severity::Debug | Severity::Trace => self.config.log_debug_rate,
        };

        rand::rng().random::<f64>() < rate
    }

    /// Runs one controller tick.
    ///
    /// Reads and resets the exported byte counter. Over budget, the rate is
    /// multiplied by the decrease factor (floored at `min_rate`); under half
    /// the budget, by the increase factor (capped at `1.0`). Returns the
    /// rate after the tick.
    pub fn adjust_rate(&self) -> f64 {
        let bytes = self.exported_bytes.swap(0, Ordering::Relaxed);
        let target = self.config.target_bytes_per_sec;
        let current = self.current_rate();

        if target == 0 {
            return current;
        }

        let next = if bytes > target {
            (current * self.config.rate_decrease_factor).max(self.config.min_rate)
        } else if bytes < target / 2 {
            (current * self.config.rate_increase_factor).min(1.0)
        } else {
            current
        };

        if (next - current).abs() > f64::EPSILON {
            self.set_rate(next);
            self.adjustments.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                bytes,
                target,
                previous_rate = current,
                rate = next,
                "Adjusted trace sampling rate"
            );
        }

        next
    }

    /// Returns a snapshot of the sampler's state.
    #[must_use]
    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            current_rate: self.current_rate(),
            tracked_operations: self
                .operation_counts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            adjustments: self.adjustments.load(Ordering::Relaxed),
        }
    }
}

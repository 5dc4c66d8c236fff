//! The processing pipeline.
//!
//! Routes each record type through its stages:
//!
//! ```text
//! metric ─ cardinality ─ enrichment ─┬─ aggregator ─(flush)─┐
//!                                    └──────────────────────┤
//! log ──── sampler ───── enrichment ─┬─ aggregator ─(flush)─┼─ exporter
//!                                    └──────────────────────┤
//! span ─── sampler ───── enrichment ────────────────────────┘
//! ```
//!
//! `process_*` never blocks on I/O and never fails; rejected records are
//! only counted.

use crate::aggregator::{Aggregator, AggregatorStats};
use crate::cardinality::{CardinalityController, CardinalityStats};
use crate::config::{ConfigError, PipelineConfig};
use crate::enrichment::Enricher;
use crate::exporter::{ExportError, Exporter, ExporterStats, Transport};
use crate::models::{LogRecord, Metric, Span};
use crate::sampler::{AdaptiveSampler, SamplerStats};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors raised while building or stopping a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The exporter could not be built or did not drain in time.
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Read-only snapshot of the pipeline's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    /// Metrics handed to [`Pipeline::process_metric`].
    pub metrics_processed: u64,
    /// Log records handed to [`Pipeline::process_log`].
    pub logs_processed: u64,
    /// Spans handed to [`Pipeline::process_span`].
    pub traces_processed: u64,
    /// Metrics rejected by the cardinality controller.
    pub dropped_by_cardinality: u64,
    /// Logs and spans rejected by the sampler.
    pub dropped_by_sampling: u64,
    /// Records pushed after shutdown began.
    pub dropped_after_shutdown: u64,
    /// Sampler state, including the current trace rate.
    pub sampler: SamplerStats,
    /// Cardinality controller counters.
    pub cardinality: CardinalityStats,
    /// Aggregator counters, including the reduction ratio.
    pub aggregator: AggregatorStats,
    /// Exporter counters.
    pub exporter: ExporterStats,
}

#[derive(Debug, Default)]
struct Counters {
    metrics_processed: AtomicU64,
    logs_processed: AtomicU64,
    traces_processed: AtomicU64,
    dropped_by_cardinality: AtomicU64,
    dropped_by_sampling: AtomicU64,
    dropped_after_shutdown: AtomicU64,
}

#[derive(Debug, Default)]
struct Tasks {
    flush: Option<JoinHandle<()>>,
    adjust: Option<JoinHandle<()>>,
    export_timer: Option<JoinHandle<()>>,
}

/// Telemetry processing pipeline.
///
/// # Example
///
/// ```no_run
/// use pipeline::{Pipeline, PipelineConfig};
/// use pipeline::models::Metric;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), pipeline::PipelineError> {
/// let pipeline = Arc::new(Pipeline::new(PipelineConfig::default())?);
/// pipeline.start();
///
/// pipeline.process_metric(Metric::gauge("cpu.usage", 0.42).with_label("core", "0"));
///
/// pipeline.shutdown(Duration::from_secs(10)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    cardinality: CardinalityController,
    sampler: AdaptiveSampler,
    enricher: Enricher,
    aggregator: Aggregator,
    exporter: Arc<Exporter>,
    counters: Counters,
    /// `true` once shutdown has begun. Held for reading while a record is
    /// processed, so the final flush sees every accepted record.
    closed: RwLock<bool>,
    cancel: CancellationToken,
    tasks: Mutex<Tasks>,
}

impl Pipeline {
    /// Builds a pipeline exporting over the configured OTLP protocol.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the transport
    /// cannot be built.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate_config()?;
        let exporter = Exporter::connect(&config.export)?;
        Ok(Self::assemble(config, exporter))
    }

    /// Builds a pipeline delivering through a custom transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_transport(
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PipelineError> {
        config.validate_config()?;
        let exporter = Exporter::new(&config.export, transport);
        Ok(Self::assemble(config, exporter))
    }

    fn assemble(config: PipelineConfig, exporter: Exporter) -> Self {
        let sampler = AdaptiveSampler::new(config.sampling.clone());
        let exporter = exporter.with_byte_counter(sampler.byte_counter());

        Self {
            cardinality: CardinalityController::new(config.cardinality.clone()),
            enricher: Enricher::from_config(&config.enrichment),
            aggregator: Aggregator::new(config.aggregation.clone()),
            sampler,
            exporter: Arc::new(exporter),
            counters: Counters::default(),
            closed: RwLock::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Tasks::default()),
            config,
        }
    }

    /// Replaces the enricher built from configuration.
    #[must_use]
    pub fn with_enricher(mut self, enricher: Enricher) -> Self {
        self.enricher = enricher;
        self
    }

    /// Returns the configuration the pipeline was built with.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the adaptive sampler.
    #[must_use]
    pub const fn sampler(&self) -> &AdaptiveSampler {
        &self.sampler
    }

    /// True once `shutdown` has begun; later records are dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    const fn aggregate_metrics(&self) -> bool {
        self.config.aggregation.enabled
    }

    const fn aggregate_logs(&self) -> bool {
        self.config.aggregation.enabled && self.config.aggregation.group_similar_logs
    }

    /// Runs `f` unless shutdown has begun, in which case the record is
    /// counted as dropped.
    fn admit<F: FnOnce()>(&self, f: F) {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            self.counters
                .dropped_after_shutdown
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        f();
    }

    /// Processes one metric.
    pub fn process_metric(&self, metric: Metric) {
        self.counters.metrics_processed.fetch_add(1, Ordering::Relaxed);
        self.admit(|| {
            let Some(mut metric) = self.cardinality.admit(metric) else {
                self.counters
                    .dropped_by_cardinality
                    .fetch_add(1, Ordering::Relaxed);
                return;
            };
            self.enricher.enrich_metric(&mut metric);

            if self.aggregate_metrics() {
                self.aggregator.add_metric(metric);
            } else {
                self.exporter.export_metric(metric);
            }
        });
    }

    /// Processes one log record.
    pub fn process_log(&self, record: LogRecord) {
        self.counters.logs_processed.fetch_add(1, Ordering::Relaxed);
        self.admit(|| {
            if !self.sampler.should_sample_log(&record) {
                self.counters
                    .dropped_by_sampling
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
            let mut record = record;
            self.enricher.enrich_log(&mut record);

            if self.aggregate_logs() {
                self.aggregator.add_log(record);
            } else {
                self.exporter.export_log(record);
            }
        });
    }

    /// Processes one span.
    pub fn process_span(&self, span: Span) {
        self.counters.traces_processed.fetch_add(1, Ordering::Relaxed);
        self.admit(|| {
            if !self.sampler.should_sample_span(&span) {
                self.counters
                    .dropped_by_sampling
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
            let mut span = span;
            self.enricher.enrich_span(&mut span);
            self.exporter.export_span(span);
        });
    }

    /// Flushes the aggregator window into the exporter.
    ///
    /// Returns the number of records handed to the exporter.
    pub fn flush(&self) -> usize {
        let metrics = self.aggregator.flush();
        let logs = self.aggregator.flush_logs();
        let total = metrics.len() + logs.len();

        for metric in metrics {
            self.exporter.export_metric(metric);
        }
        for record in logs {
            self.exporter.export_log(record);
        }
        total
    }

    /// Spawns the background loops: the aggregation flush, the sampling
    /// rate controller (when sampling is enabled) and the export timer.
    ///
    /// Must be called from within a Tokio runtime. Calling it again has no
    /// effect.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.export_timer.is_some() || self.cancel.is_cancelled() {
            tracing::warn!("Pipeline already started");
            return;
        }

        if self.config.aggregation.enabled {
            tasks.flush = Some(self.spawn_flush_loop());
        }
        if self.config.sampling.enabled && self.config.sampling.target_bytes_per_sec > 0 {
            tasks.adjust = Some(self.spawn_adjust_loop());
        }
        tasks.export_timer = Some(self.exporter.start());

        tracing::info!(
            window_ms = self.config.aggregation.window_ms,
            sampling = self.config.sampling.enabled,
            trace_rate = self.sampler.current_rate(),
            endpoint = %self.config.export.endpoint,
            "Pipeline started"
        );
    }

    fn spawn_flush_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let cancel = self.cancel.clone();
        let window = self.config.aggregation.window();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + window, window);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let flushed = pipeline.flush();
                        tracing::debug!(records = flushed, "Aggregation window flushed");
                    }
                }
            }
            let flushed = pipeline.flush();
            tracing::debug!(records = flushed, "Final aggregation flush");
        })
    }

    fn spawn_adjust_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval = self.config.sampling.adjust_interval();

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        pipeline.sampler.adjust_rate();
                    }
                }
            }
        })
    }

    /// Stops the pipeline.
    ///
    /// New records are refused from this point on. The background loops
    /// are stopped (the flush loop performs a final flush), then the
    /// exporter drains within `timeout`. Calling this more than once has no
    /// effect.
    ///
    /// # Errors
    ///
    /// Returns an error if in-flight exports did not finish in time.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        {
            let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        tracing::info!("Shutting down pipeline");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));

        let flushed_by_loop = tasks.flush.is_some();
        for handle in [tasks.flush, tasks.adjust].into_iter().flatten() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Pipeline task failed");
            }
        }
        if !flushed_by_loop {
            self.flush();
        }

        let result = self.exporter.shutdown(timeout).await;
        if let Some(timer) = tasks.export_timer {
            if let Err(err) = timer.await {
                tracing::error!(error = %err, "Export timer failed");
            }
        }

        tracing::info!(stats = ?self.stats(), "Pipeline stopped");
        Ok(result?)
    }

    /// Returns a snapshot of the pipeline's counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            metrics_processed: self.counters.metrics_processed.load(Ordering::Relaxed),
            logs_processed: self.counters.logs_processed.load(Ordering::Relaxed),
            traces_processed: self.counters.traces_processed.load(Ordering::Relaxed),
            dropped_by_cardinality: self.counters.dropped_by_cardinality.load(Ordering::Relaxed),
            dropped_by_sampling: self.counters.dropped_by_sampling.load(Ordering::Relaxed),
            dropped_after_shutdown: self.counters.dropped_after_shutdown.load(Ordering::Relaxed),
            sampler: self.sampler.stats(),
            cardinality: self.cardinality.stats(),
            aggregator: self.aggregator.stats(),
            exporter: self.exporter.stats(),
        }
    }
}

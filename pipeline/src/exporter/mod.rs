//! Batched, asynchronous export.
//!
//! Records are appended to one in-memory batch per signal. A batch is sent
//! as soon as it reaches `batch_size`, and all batches are flushed together
//! every `batch_timeout`. Sends run as detached tasks so producers never wait
//! on the network.
//!
//! Delivery is at-most-once: a batch that fails (after the configured
//! retries, if any) is dropped and counted.

pub mod grpc;
pub mod otlp;
pub mod transport;

pub use grpc::GrpcTransport;
pub use otlp::{EncodedBatch, ExportRequest};
pub use transport::{HttpTransport, Signal, Transport};

use crate::config::{ExportConfig, Protocol, RetryConfig};
use crate::models::{LogRecord, Metric, Span};
use chrono::{DateTime, Utc};
use std::mem;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Errors raised while encoding or delivering batches.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The batch could not be serialized.
    #[error("Failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    /// The request could not be sent or the client could not be built.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gRPC channel could not be configured.
    #[error("gRPC channel error: {0}")]
    Channel(#[from] tonic::transport::Error),

    /// The collector answered a gRPC export with an error status.
    #[error("Collector returned gRPC {}: {}", .0.code(), .0.message())]
    Grpc(#[from] tonic::Status),

    /// The collector answered with a non-success status.
    #[error("Collector returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// A configured credential is not a valid header value.
    #[error("Invalid value for header {0}")]
    InvalidHeader(&'static str),

    /// The CA certificate file could not be read.
    #[error("Failed to read CA file '{path}': {source}")]
    CaFile {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The send was abandoned because the shutdown deadline passed.
    #[error("Send aborted by shutdown")]
    Aborted,

    /// In-flight sends did not finish before the shutdown deadline.
    #[error("Shutdown timed out after {0:?} with sends in flight")]
    ShutdownTimeout(Duration),
}

impl ExportError {
    /// Returns whether a retry may succeed.
    ///
    /// Transport failures and server errors are retryable. Client errors
    /// (4xx) indicate a payload or credential problem and are not. gRPC
    /// statuses follow the OTLP list of retryable codes.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Cancelled
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::Aborted
                    | tonic::Code::OutOfRange
                    | tonic::Code::Unavailable
                    | tonic::Code::DataLoss
            ),
            _ => false,
        }
    }
}

/// A batch of records of one signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    /// Metric data points.
    Metrics(Vec<Metric>),
    /// Log records.
    Logs(Vec<LogRecord>),
    /// Trace spans.
    Spans(Vec<Span>),
}

impl Batch {
    /// Returns the signal of this batch.
    #[must_use]
    pub const fn signal(&self) -> Signal {
        match self {
            Self::Metrics(_) => Signal::Metrics,
            Self::Logs(_) => Signal::Logs,
            Self::Spans(_) => Signal::Traces,
        }
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Metrics(m) => m.len(),
            Self::Logs(l) => l.len(),
            Self::Spans(s) => s.len(),
        }
    }

    /// Returns `true` if the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Point-in-time exporter counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExporterStats {
    /// Records acknowledged by the collector.
    pub points_exported: u64,
    /// Payload bytes acknowledged by the collector.
    pub bytes_sent: u64,
    /// Batches acknowledged by the collector.
    pub batches_sent: u64,
    /// Batches that failed delivery.
    pub errors: u64,
    /// Records lost to failed deliveries or pushed after shutdown.
    pub records_dropped: u64,
    /// Records skipped because they could not be encoded.
    pub encode_errors: u64,
    /// Time of the last successful delivery.
    pub last_export_time: Option<DateTime<Utc>>,
    /// Records waiting in batches.
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Counters {
    points_exported: AtomicU64,
    bytes_sent: AtomicU64,
    batches_sent: AtomicU64,
    errors: AtomicU64,
    records_dropped: AtomicU64,
    encode_errors: AtomicU64,
    last_export_millis: AtomicI64,
}

#[derive(Debug, Default)]
struct Batches {
    metrics: Vec<Metric>,
    logs: Vec<LogRecord>,
    spans: Vec<Span>,
    closed: bool,
}

impl Batches {
    fn pending(&self) -> usize {
        self.metrics.len() + self.logs.len() + self.spans.len()
    }

    fn take_all(&mut self) -> [Batch; 3] {
        [
            Batch::Metrics(mem::take(&mut self.metrics)),
            Batch::Logs(mem::take(&mut self.logs)),
            Batch::Spans(mem::take(&mut self.spans)),
        ]
    }
}

/// State shared with detached send tasks.
#[derive(Debug)]
struct Delivery {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    counters: Counters,
    exported_bytes: Option<Arc<AtomicU64>>,
    abort: CancellationToken,
}

impl Delivery {
    async fn deliver(&self, batch: Batch) {
        let signal = batch.signal();
        let encoded = otlp::encode(&batch);
        drop(batch);

        if encoded.skipped > 0 {
            self.counters
                .encode_errors
                .fetch_add(encoded.skipped as u64, Ordering::Relaxed);
            tracing::warn!(
                %signal,
                skipped = encoded.skipped,
                "Skipped records that could not be encoded"
            );
        }
        if encoded.records == 0 {
            return;
        }

        let attempts = self.retry.attempts();

        for attempt in 1..=attempts {
            let result = tokio::select! {
                () = self.abort.cancelled() => Err(ExportError::Aborted),
                result = self.transport.send(&encoded.request) => result,
            };

            match result {
                Ok(bytes) => {
                    self.record_success(encoded.records, bytes);
                    tracing::debug!(
                        %signal,
                        records = encoded.records,
                        bytes,
                        attempt,
                        "Exported batch"
                    );
                    return;
                }
                Err(err) if attempt < attempts && err.is_retryable() => {
                    let backoff = self.retry.backoff(attempt);
                    tracing::warn!(
                        %signal,
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Export failed, retrying"
                    );
                    tokio::select! {
                        () = self.abort.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => {
                    tracing::error!(
                        %signal,
                        records = encoded.records,
                        attempt,
                        error = %err,
                        "Export failed, dropping batch"
                    );
                    break;
                }
            }
        }

        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.counters
            .records_dropped
            .fetch_add(encoded.records as u64, Ordering::Relaxed);
    }

    fn record_success(&self, records: usize, bytes: u64) {
        self.counters
            .points_exported
            .fetch_add(records as u64, Ordering::Relaxed);
        self.counters.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.counters.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_export_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        if let Some(counter) = &self.exported_bytes {
            counter.fetch_add(bytes, Ordering::Relaxed);
        }
    }
}

/// Batches records per signal and delivers them in the background.
///
/// Sends are spawned on the runtime the exporter was created or started
/// in, so records may be pushed from threads outside that runtime. Without
/// any runtime, full batches stay queued until the next flush that has one.
#[derive(Debug)]
pub struct Exporter {
    batch_size: usize,
    batch_timeout: Duration,
    batches: Mutex<Batches>,
    delivery: Arc<Delivery>,
    tracker: TaskTracker,
    runtime: OnceLock<Handle>,
    shutdown: CancellationToken,
}

impl Exporter {
    /// Creates an exporter delivering through `transport`.
    #[must_use]
    pub fn new(config: &ExportConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_timeout: config.batch_timeout(),
            batches: Mutex::new(Batches::default()),
            delivery: Arc::new(Delivery {
                transport,
                retry: config.retry.clone(),
                counters: Counters::default(),
                exported_bytes: None,
                abort: CancellationToken::new(),
            }),
            tracker: TaskTracker::new(),
            runtime: Handle::try_current().map(OnceLock::from).unwrap_or_default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates an exporter with the transport named by `config.protocol`.
    ///
    /// The gRPC channel connects lazily on the current Tokio runtime, so
    /// `grpc` must be configured from within one.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be built.
    pub fn connect(config: &ExportConfig) -> Result<Self, ExportError> {
        let transport: Arc<dyn Transport> = match config.protocol {
            Protocol::HttpJson | Protocol::HttpProtobuf => Arc::new(HttpTransport::new(config)?),
            Protocol::Grpc => Arc::new(GrpcTransport::new(config)?),
        };
        tracing::info!(
            endpoint = %config.base_url(),
            protocol = %config.protocol,
            "Configured OTLP exporter"
        );
        Ok(Self::new(config, transport))
    }

    /// Adds the size of every delivered payload to `counter`.
    ///
    /// Must be called before the first record is exported.
    #[must_use]
    pub fn with_byte_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        if let Some(delivery) = Arc::get_mut(&mut self.delivery) {
            delivery.exported_bytes = Some(counter);
        }
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Batches> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The caller's runtime if it has one, else the one captured earlier.
    fn runtime(&self) -> Option<Handle> {
        Handle::try_current()
            .ok()
            .or_else(|| self.runtime.get().cloned())
    }

    fn spawn_send(&self, runtime: &Handle, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        let delivery = Arc::clone(&self.delivery);
        self.tracker
            .spawn_on(async move { delivery.deliver(batch).await }, runtime);
    }

    /// Sends `take(batches)` once `len(batches)` reaches the batch size.
    fn push_and_maybe_send(
        &self,
        push: impl FnOnce(&mut Batches) -> usize,
        take: impl FnOnce(&mut Batches) -> Batch,
    ) {
        let mut batches = self.lock();
        if batches.closed {
            drop(batches);
            self.dropped_after_close();
            return;
        }
        if push(&mut batches) < self.batch_size {
            return;
        }
        let Some(runtime) = self.runtime() else {
            tracing::debug!("No runtime to send a full batch on, keeping it queued");
            return;
        };
        let batch = take(&mut batches);
        drop(batches);
        self.spawn_send(&runtime, batch);
    }

    fn dropped_after_close(&self) {
        self.delivery
            .counters
            .records_dropped
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Record exported after shutdown, dropping");
    }

    /// Queues a metric for export.
    pub fn export_metric(&self, metric: Metric) {
        self.push_and_maybe_send(
            |b| {
                b.metrics.push(metric);
                b.metrics.len()
            },
            |b| Batch::Metrics(mem::take(&mut b.metrics)),
        );
    }

    /// Queues a log record for export.
    pub fn export_log(&self, record: LogRecord) {
        self.push_and_maybe_send(
            |b| {
                b.logs.push(record);
                b.logs.len()
            },
            |b| Batch::Logs(mem::take(&mut b.logs)),
        );
    }

    /// Queues a span for export.
    pub fn export_span(&self, span: Span) {
        self.push_and_maybe_send(
            |b| {
                b.spans.push(span);
                b.spans.len()
            },
            |b| Batch::Spans(mem::take(&mut b.spans)),
        );
    }

    /// Sends every non-empty batch.
    pub fn flush_all(&self) {
        let Some(runtime) = self.runtime() else {
            tracing::debug!("No runtime to flush on, keeping batches queued");
            return;
        };
        let taken = self.lock().take_all();
        for batch in taken {
            self.spawn_send(&runtime, batch);
        }
    }

    /// Starts the periodic flush timer. It stops on [`Self::shutdown`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let _ = self.runtime.set(Handle::current());
        let exporter = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let period = self.batch_timeout;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => exporter.flush_all(),
                }
            }
            tracing::debug!("Export timer stopped");
        })
    }

    /// Stops accepting records, flushes what is queued and waits for
    /// in-flight sends, then closes the transport.
    ///
    /// Sends still running at the deadline are aborted and their records
    /// counted as dropped. Calling this more than once has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::ShutdownTimeout`] if sends were still in flight
    /// when `timeout` elapsed.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ExportError> {
        let taken = {
            let mut batches = self.lock();
            if batches.closed {
                return Ok(());
            }
            batches.closed = true;
            self.shutdown.cancel();
            batches.take_all()
        };
        let runtime = Handle::current();
        for batch in taken {
            self.spawn_send(&runtime, batch);
        }
        self.tracker.close();

        let result = if tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
        {
            Ok(())
        } else {
            tracing::warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Export shutdown timed out, aborting sends"
            );
            self.delivery.abort.cancel();
            self.tracker.wait().await;
            Err(ExportError::ShutdownTimeout(timeout))
        };

        self.delivery.transport.close().await;
        tracing::info!(stats = ?self.stats(), "Exporter shut down");
        result
    }

    /// Returns a snapshot of the exporter's counters.
    #[must_use]
    pub fn stats(&self) -> ExporterStats {
        let counters = &self.delivery.counters;
        let millis = counters.last_export_millis.load(Ordering::Relaxed);
        ExporterStats {
            points_exported: counters.points_exported.load(Ordering::Relaxed),
            bytes_sent: counters.bytes_sent.load(Ordering::Relaxed),
            batches_sent: counters.batches_sent.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            records_dropped: counters.records_dropped.load(Ordering::Relaxed),
            encode_errors: counters.encode_errors.load(Ordering::Relaxed),
            last_export_time: (millis > 0)
                .then(|| DateTime::from_timestamp_millis(millis))
                .flatten(),
            pending: self.lock().pending(),
        }
    }
}

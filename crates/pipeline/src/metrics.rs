//! Pipeline metrics
//!
//! Atomic counters updated by the workers. All operations use relaxed
//! ordering; values are eventually consistent, not real-time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics for one pipeline
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Non-empty windows read from the buffer
    batches_read: AtomicU64,

    /// Records read from the buffer
    records_read: AtomicU64,

    /// Records drained from peer receive buffers
    records_received: AtomicU64,

    /// Records handed to the sinks
    records_written: AtomicU64,

    /// Records tagged as failed and written to the dead-letter queue
    records_dead_lettered: AtomicU64,

    /// Batches fully delivered and checkpointed
    batches_succeeded: AtomicU64,

    /// Batches left uncommitted for redelivery
    batches_failed: AtomicU64,

    /// Batch failures caused by a processor
    processor_errors: AtomicU64,

    /// Batch failures caused by a sink
    sink_errors: AtomicU64,

    /// Rejected checkpoints
    checkpoint_errors: AtomicU64,

    /// Total processing time in nanoseconds, read to checkpoint
    processing_ns: AtomicU64,
}

impl PipelineMetrics {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_read(&self, records: usize) {
        self.batches_read.fetch_add(1, Ordering::Relaxed);
        self.records_read
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_received(&self, records: usize) {
        self.records_received
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_written(&self, records: usize) {
        self.records_written
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dead_lettered(&self, records: usize) {
        self.records_dead_lettered
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_success(&self, duration: Duration) {
        self.batches_succeeded.fetch_add(1, Ordering::Relaxed);
        self.processing_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_failure(&self, kind: FailureKind) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        match kind {
            FailureKind::Processor => {
                self.processor_errors.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::Sink => {
                self.sink_errors.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::DeadLetter | FailureKind::Receive => {}
        }
    }

    #[inline]
    pub(crate) fn record_checkpoint_error(&self) {
        self.checkpoint_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_read: self.batches_read.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            records_received: self.records_received.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_dead_lettered: self.records_dead_lettered.load(Ordering::Relaxed),
            batches_succeeded: self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            processor_errors: self.processor_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            checkpoint_errors: self.checkpoint_errors.load(Ordering::Relaxed),
            processing_ns: self.processing_ns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of pipeline metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub batches_read: u64,
    pub records_read: u64,
    pub records_received: u64,
    pub records_written: u64,
    pub records_dead_lettered: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub processor_errors: u64,
    pub sink_errors: u64,
    pub checkpoint_errors: u64,
    pub processing_ns: u64,
}

impl MetricsSnapshot {
    /// Share of finished batches that succeeded (0.0 - 1.0)
    ///
    /// Returns None if no batch has finished.
    #[inline]
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.batches_succeeded + self.batches_failed;
        if total == 0 {
            None
        } else {
            Some(self.batches_succeeded as f64 / total as f64)
        }
    }

    /// Mean time from read to checkpoint of a successful batch
    pub fn mean_processing_time(&self) -> Option<Duration> {
        (self.batches_succeeded > 0)
            .then(|| Duration::from_nanos(self.processing_ns / self.batches_succeeded))
    }

    /// Difference from an earlier snapshot, for rates over an interval
    pub fn diff(&self, previous: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_read: self.batches_read.saturating_sub(previous.batches_read),
            records_read: self.records_read.saturating_sub(previous.records_read),
            records_received: self
                .records_received
                .saturating_sub(previous.records_received),
            records_written: self.records_written.saturating_sub(previous.records_written),
            records_dead_lettered: self
                .records_dead_lettered
                .saturating_sub(previous.records_dead_lettered),
            batches_succeeded: self
                .batches_succeeded
                .saturating_sub(previous.batches_succeeded),
            batches_failed: self.batches_failed.saturating_sub(previous.batches_failed),
            processor_errors: self
                .processor_errors
                .saturating_sub(previous.processor_errors),
            sink_errors: self.sink_errors.saturating_sub(previous.sink_errors),
            checkpoint_errors: self
                .checkpoint_errors
                .saturating_sub(previous.checkpoint_errors),
            processing_ns: self.processing_ns.saturating_sub(previous.processing_ns),
        }
    }
}

/// Stage of a batch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A processor returned an error for the whole batch
    Processor,
    /// A sink rejected the batch
    Sink,
    /// Failed records could not be dead-lettered
    DeadLetter,
    /// A peer receive buffer could not be drained
    Receive,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processor => "processor",
            Self::Sink => "sink",
            Self::DeadLetter => "dead_letter",
            Self::Receive => "receive",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failed batch, published to failure subscribers
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub pipeline: String,
    pub worker_id: usize,
    pub kind: FailureKind,
    /// Records in the uncommitted window
    pub records: usize,
    pub error: String,
}

// ============================================================================
// Failure Tracker - Rate-limited logging of batch failures
// ============================================================================

/// Rate-limited failure logging
///
/// Aggregates failed batches and logs a summary at most once per second
/// instead of once per batch. A sink that is down fails every batch every
/// worker reads; without aggregation that is a log line per batch.
///
/// # Thresholds
///
/// - >0 failures/sec: WARN level
/// - >100 failures/sec: ERROR level
pub struct FailureTracker {
    /// Failed batches in current interval
    interval_batches: AtomicU64,
    /// Records in failed batches in current interval
    interval_records: AtomicU64,
    /// Last log time (epoch milliseconds)
    last_log_ms: AtomicU64,
}

/// Log interval in milliseconds
const LOG_INTERVAL_MS: u64 = 1000;
/// Failures/sec that trigger ERROR level
const CRITICAL_FAILURE_THRESHOLD: u64 = 100;

impl FailureTracker {
    pub fn new() -> Self {
        Self {
            interval_batches: AtomicU64::new(0),
            interval_records: AtomicU64::new(0),
            last_log_ms: AtomicU64::new(0),
        }
    }

    /// Record a failed batch; returns true if a summary was logged
    pub fn record(&self, pipeline: &str, records: usize) -> bool {
        self.interval_batches.fetch_add(1, Ordering::Relaxed);
        self.interval_records
            .fetch_add(records as u64, Ordering::Relaxed);

        self.maybe_log(pipeline)
    }

    fn maybe_log(&self, pipeline: &str) -> bool {
        let now = Self::now_ms();
        let last = self.last_log_ms.load(Ordering::Relaxed);

        if now.saturating_sub(last) < LOG_INTERVAL_MS {
            return false;
        }

        // Claim the log slot so concurrent workers log once
        if self
            .last_log_ms
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        let batches = self.interval_batches.swap(0, Ordering::Relaxed);
        let records = self.interval_records.swap(0, Ordering::Relaxed);

        if batches == 0 {
            return false;
        }

        if batches > CRITICAL_FAILURE_THRESHOLD {
            tracing::error!(
                pipeline,
                failed_batches = batches,
                records,
                threshold = CRITICAL_FAILURE_THRESHOLD,
                "CRITICAL: most batches failing, windows redelivering"
            );
        } else {
            tracing::warn!(
                pipeline,
                failed_batches = batches,
                records,
                "batches failed in last second, windows will be redelivered"
            );
        }

        true
    }

    #[inline]
    fn now_ms() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Failed batches not yet reported
    #[cfg(test)]
    pub fn pending(&self) -> u64 {
        self.interval_batches.load(Ordering::Relaxed)
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FailureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureTracker")
            .field("interval_batches", &self.interval_batches.load(Ordering::Relaxed))
            .finish()
    }
}

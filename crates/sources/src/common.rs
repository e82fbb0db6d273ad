//! Common types shared by all sources

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sluice_buffer::{BufferError, GatedWriter};
use sluice_protocol::{AcknowledgementManager, Event};
use sluice_resilience::Backoff;
use thiserror::Error;

/// Everything a source needs to write into its pipeline
#[derive(Clone)]
pub struct SourceContext {
    /// Pipeline name, for logging
    pub pipeline: String,

    /// Breaker-gated write path into the pipeline buffer
    pub writer: GatedWriter<Event>,

    /// Timeout for a single write attempt
    pub write_timeout: Duration,

    /// Delay between rejected write attempts
    pub backoff: Backoff,

    /// Present when the pipeline runs with acknowledgements
    pub acknowledgements: Option<AcknowledgementManager>,
}

impl SourceContext {
    pub fn new(pipeline: impl Into<String>, writer: GatedWriter<Event>) -> Self {
        Self {
            pipeline: pipeline.into(),
            writer,
            write_timeout: Duration::from_secs(1),
            backoff: Backoff::default(),
            acknowledgements: None,
        }
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_acknowledgements(mut self, manager: AcknowledgementManager) -> Self {
        self.acknowledgements = Some(manager);
        self
    }
}

impl std::fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceContext")
            .field("pipeline", &self.pipeline)
            .field("write_timeout", &self.write_timeout)
            .field("backoff", &self.backoff)
            .field("acknowledgements", &self.acknowledgements.is_some())
            .finish()
    }
}

/// Counters shared by the network and generator sources
///
/// Connection counters stay at zero for sources that don't accept
/// connections.
#[derive(Debug, Default)]
pub struct SourceMetrics {
    connections_active: AtomicU64,
    connections_total: AtomicU64,
    records_received: AtomicU64,
    bytes_received: AtomicU64,
    records_written: AtomicU64,
    batches_written: AtomicU64,
    /// Input that could not be turned into an event
    invalid_records: AtomicU64,
    write_errors: AtomicU64,
    acknowledged_sets: AtomicU64,
    /// Sets that failed or expired
    failed_sets: AtomicU64,
}

impl SourceMetrics {
    pub const fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            records_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
            invalid_records: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            acknowledged_sets: AtomicU64::new(0),
            failed_sets: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn received(&self, records: u64, bytes: u64) {
        self.records_received.fetch_add(records, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A batch of `records` was admitted into the buffer
    #[inline]
    pub fn batch_written(&self, records: u64) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.records_written.fetch_add(records, Ordering::Relaxed);
    }

    #[inline]
    pub fn invalid(&self) {
        self.invalid_records.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the outcome of one acknowledgement set
    #[inline]
    pub fn set_completed(&self, success: bool) {
        let counter = if success {
            &self.acknowledged_sets
        } else {
            &self.failed_sets
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            connections_active: load(&self.connections_active),
            connections_total: load(&self.connections_total),
            records_received: load(&self.records_received),
            bytes_received: load(&self.bytes_received),
            records_written: load(&self.records_written),
            batches_written: load(&self.batches_written),
            invalid_records: load(&self.invalid_records),
            write_errors: load(&self.write_errors),
            acknowledged_sets: load(&self.acknowledged_sets),
            failed_sets: load(&self.failed_sets),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_active: u64,
    pub connections_total: u64,
    pub records_received: u64,
    pub bytes_received: u64,
    pub records_written: u64,
    pub batches_written: u64,
    pub invalid_records: u64,
    pub write_errors: u64,
    pub acknowledged_sets: u64,
    pub failed_sets: u64,
}

/// Source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to bind a listener
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// `start` called on a running source
    #[error("source '{0}' is already running")]
    AlreadyRunning(String),

    /// Write into the pipeline buffer failed
    #[error("buffer write failed: {0}")]
    Buffer(#[from] BufferError),
}

impl SourceError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

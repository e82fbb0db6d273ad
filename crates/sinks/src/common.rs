//! Counters and errors every sink shares
//!
//! The pipeline reads a [`MetricsSnapshot`] from each sink at shutdown and
//! when logging throughput; sinks only ever bump the counters.

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Default)]
pub struct SinkMetrics {
    batches_received: AtomicU64,
    batches_written: AtomicU64,
    records_written: AtomicU64,
    bytes_written: AtomicU64,
    write_errors: AtomicU64,
    flushes: AtomicU64,
}

impl SinkMetrics {
    pub const fn new() -> Self {
        Self {
            batches_received: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn batch_received(&self) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch of `records` landed; `bytes` is 0 for sinks that don't serialize
    #[inline]
    pub fn batch_written(&self, records: u64, bytes: u64) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.records_written.fetch_add(records, Ordering::Relaxed);
        if bytes > 0 {
            self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn flushed(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            batches_received: load(&self.batches_received),
            batches_written: load(&self.batches_written),
            records_written: load(&self.records_written),
            bytes_written: load(&self.bytes_written),
            write_errors: load(&self.write_errors),
            flush_count: load(&self.flushes),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_received: u64,
    pub batches_written: u64,
    pub records_written: u64,
    pub bytes_written: u64,
    pub write_errors: u64,
    pub flush_count: u64,
}

impl MetricsSnapshot {
    /// Batches that arrived but never landed, failed or still in flight
    pub fn batches_pending(&self) -> u64 {
        self.batches_received.saturating_sub(self.batches_written)
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to initialize sink: {0}")]
    Init(String),

    #[error("write failed: {0}")]
    Write(String),

    /// `write` called before `initialize` succeeded, or after `close`
    #[error("sink '{0}' is not ready")]
    NotReady(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkError {
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_ready(sink: impl Into<String>) -> Self {
        Self::NotReady(sink.into())
    }
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

#[cfg(test)]
#[path = "common_test.rs"]
mod common_test;

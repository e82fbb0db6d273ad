//! Buffer metrics
//!
//! Atomic counters, relaxed ordering. Values are eventually consistent.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one buffer instance
#[derive(Debug, Default)]
pub struct BufferMetrics {
    records_written: AtomicU64,
    records_read: AtomicU64,
    records_checkpointed: AtomicU64,
    records_redelivered: AtomicU64,
    write_timeouts: AtomicU64,
    invalid_checkpoints: AtomicU64,
}

impl BufferMetrics {
    #[inline]
    pub const fn new() -> Self {
        Self {
            records_written: AtomicU64::new(0),
            records_read: AtomicU64::new(0),
            records_checkpointed: AtomicU64::new(0),
            records_redelivered: AtomicU64::new(0),
            write_timeouts: AtomicU64::new(0),
            invalid_checkpoints: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_written(&self, count: usize) {
        self.records_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_read(&self, count: usize) {
        self.records_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_checkpointed(&self, count: usize) {
        self.records_checkpointed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_redelivered(&self, count: usize) {
        self.records_redelivered
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_write_timeout(&self) {
        self.write_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_invalid_checkpoint(&self) {
        self.invalid_checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot
    pub fn snapshot(&self) -> BufferMetricsSnapshot {
        BufferMetricsSnapshot {
            records_written: self.records_written.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            records_checkpointed: self.records_checkpointed.load(Ordering::Relaxed),
            records_redelivered: self.records_redelivered.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
            invalid_checkpoints: self.invalid_checkpoints.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of buffer metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferMetricsSnapshot {
    pub records_written: u64,
    pub records_read: u64,
    pub records_checkpointed: u64,
    pub records_redelivered: u64,
    pub write_timeouts: u64,
    pub invalid_checkpoints: u64,
}

//! Forwarder metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one peer forwarder
#[derive(Debug, Default)]
pub struct ForwarderMetrics {
    /// Records the ring assigned to this node
    pub records_to_be_processed_locally: AtomicU64,
    /// Records returned for local processing, fallbacks included
    pub records_actually_processed_locally: AtomicU64,
    /// Records the ring assigned to another node
    pub records_to_be_forwarded: AtomicU64,
    /// Records a peer accepted
    pub records_successfully_forwarded: AtomicU64,
    /// Records that could not be queued or sent
    pub records_failed_forwarding: AtomicU64,
    /// Records carrying none of the identification keys
    pub records_missing_identification_keys: AtomicU64,
    /// Records handed to the dead-letter queue
    pub records_dead_lettered: AtomicU64,
    /// Records lost after every fallback failed
    pub records_dropped: AtomicU64,
    pub requests_successful: AtomicU64,
    pub requests_failed: AtomicU64,
}

impl ForwarderMetrics {
    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ForwarderMetricsSnapshot {
        ForwarderMetricsSnapshot {
            records_to_be_processed_locally: self
                .records_to_be_processed_locally
                .load(Ordering::Relaxed),
            records_actually_processed_locally: self
                .records_actually_processed_locally
                .load(Ordering::Relaxed),
            records_to_be_forwarded: self.records_to_be_forwarded.load(Ordering::Relaxed),
            records_successfully_forwarded: self
                .records_successfully_forwarded
                .load(Ordering::Relaxed),
            records_failed_forwarding: self.records_failed_forwarding.load(Ordering::Relaxed),
            records_missing_identification_keys: self
                .records_missing_identification_keys
                .load(Ordering::Relaxed),
            records_dead_lettered: self.records_dead_lettered.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            requests_successful: self.requests_successful.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time forwarder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderMetricsSnapshot {
    pub records_to_be_processed_locally: u64,
    pub records_actually_processed_locally: u64,
    pub records_to_be_forwarded: u64,
    pub records_successfully_forwarded: u64,
    pub records_failed_forwarding: u64,
    pub records_missing_identification_keys: u64,
    pub records_dead_lettered: u64,
    pub records_dropped: u64,
    pub requests_successful: u64,
    pub requests_failed: u64,
}

//! Aggregate Processor - Per-key event aggregation
//!
//! Groups events by their identification keys and emits one event per
//! group when the group closes.
//!
//! Stateful: every event for a key has to be seen by the same instance, so
//! the processor declares its identification keys and the engine routes
//! batches through the peer forwarder before it.
//!
//! # Output
//!
//! ```json
//! {"trace_id": "abc", "count": 42,
//!  "first_seen": "2026-01-01T00:00:00.000Z", "last_seen": "2026-01-01T00:00:04.812Z"}
//! ```
//!
//! A group closes when `window_ms` has elapsed since its first event or
//! when it holds `max_events` events. Events carrying none of the keys are
//! tagged as failed and passed on. Remaining groups are emitted once the
//! pipeline prepares for shutdown.
//!
//! # Example
//!
//! ```toml
//! [[processors]]
//! type = "aggregate"
//! identification_keys = ["trace_id"]
//! window_ms = 5000
//! max_events = 1000
//! ```

mod config;
mod state;

pub use config::AggregateConfig;
pub use state::{AggregateGroup, AggregateState, KeyValues, group_key, key_values};

use crate::registry::ProcessorFactory;
use crate::{Processor, ProcessorError, ProcessorFuture, ProcessorResult};
use sluice_config::PluginConfig;
use sluice_protocol::{Event, KeyPath, Record};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

/// Metrics for the aggregate processor
#[derive(Debug, Default)]
pub struct AggregateMetrics {
    /// Batches processed
    pub batches_processed: AtomicU64,
    /// Records received
    pub records_received: AtomicU64,
    /// Records folded into a group
    pub records_aggregated: AtomicU64,
    /// Records carrying none of the identification keys
    pub records_missing_keys: AtomicU64,
    /// Groups opened
    pub groups_created: AtomicU64,
    /// Groups closed and emitted
    pub groups_emitted: AtomicU64,
}

/// Aggregate processor
pub struct AggregateProcessor {
    config: AggregateConfig,
    state: Mutex<AggregateState>,
    open_groups: AtomicUsize,
    flushing: AtomicBool,
    metrics: AggregateMetrics,
}

impl AggregateProcessor {
    /// Create a new aggregate processor
    pub fn new(config: AggregateConfig) -> ProcessorResult<Self> {
        config.validate().map_err(ProcessorError::config)?;

        Ok(Self {
            config,
            state: Mutex::new(AggregateState::new()),
            open_groups: AtomicUsize::new(0),
            flushing: AtomicBool::new(false),
            metrics: AggregateMetrics::default(),
        })
    }

    /// Get processor metrics
    pub fn metrics(&self) -> &AggregateMetrics {
        &self.metrics
    }

    /// Number of open groups
    pub fn group_count(&self) -> usize {
        self.open_groups.load(Ordering::Relaxed)
    }

    async fn process_batch(&self, records: Vec<Record<Event>>) -> Vec<Record<Event>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let keys = &self.config.identification_keys;

        self.metrics.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .records_received
            .fetch_add(records.len() as u64, Ordering::Relaxed);

        let mut output = Vec::new();
        let mut emitted = 0u64;

        // Close groups whose window elapsed before taking new events
        for group in state.take_expired(self.config.window(), now) {
            output.push(Record::new(group.into_event(keys)));
            emitted += 1;
        }

        for mut record in records {
            let Some(values) = key_values(record.data(), keys) else {
                tracing::debug!(processor = "aggregate", "record has no identification keys");
                record
                    .data_mut()
                    .tag_failure("missing all identification keys");
                self.metrics
                    .records_missing_keys
                    .fetch_add(1, Ordering::Relaxed);
                output.push(record);
                continue;
            };

            let (group_key, is_new) = state.add(values, record.data(), now);
            self.metrics
                .records_aggregated
                .fetch_add(1, Ordering::Relaxed);
            if is_new {
                self.metrics.groups_created.fetch_add(1, Ordering::Relaxed);
            }

            if state
                .get(&group_key)
                .is_some_and(|g| g.is_full(self.config.max_events))
                && let Some(group) = state.remove(&group_key)
            {
                output.push(Record::new(group.into_event(keys)));
                emitted += 1;
            }
        }

        if self.flushing.load(Ordering::SeqCst) {
            for group in state.take_all() {
                output.push(Record::new(group.into_event(keys)));
                emitted += 1;
            }
        }

        self.metrics
            .groups_emitted
            .fetch_add(emitted, Ordering::Relaxed);
        self.open_groups
            .store(state.group_count(), Ordering::Relaxed);

        output
    }
}

impl Processor for AggregateProcessor {
    fn execute<'a>(&'a self, records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async move { Ok(self.process_batch(records).await) })
    }

    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn identification_keys(&self) -> Option<&[KeyPath]> {
        Some(&self.config.identification_keys)
    }

    fn requires_exclusive(&self) -> bool {
        true
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn prepare_for_shutdown(&self) {
        self.flushing.store(true, Ordering::SeqCst);
    }

    fn is_ready_for_shutdown(&self) -> bool {
        self.open_groups.load(Ordering::Relaxed) == 0
    }
}

impl std::fmt::Debug for AggregateProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateProcessor")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish()
    }
}

/// Factory for creating aggregate processors
#[derive(Debug, Clone, Copy)]
pub struct AggregateFactory;

impl ProcessorFactory for AggregateFactory {
    fn create(&self, config: &PluginConfig) -> ProcessorResult<Box<dyn Processor>> {
        let aggregate_config =
            AggregateConfig::try_from(config).map_err(ProcessorError::config)?;
        Ok(Box::new(AggregateProcessor::new(aggregate_config)?))
    }

    fn name(&self) -> &'static str {
        "aggregate"
    }
}

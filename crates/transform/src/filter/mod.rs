//! Filter Processor - Drop, keep or tag events by condition
//!
//! # Configuration
//!
//! | Option | Type | Default | Description |
//! |--------|------|---------|-------------|
//! | `action` | string | `"drop"` | On match: `drop`, `keep` (drop non-matches) or `tag` |
//! | `match_mode` | string | `"all"` | `all` (AND) or `any` (OR) |
//! | `tag_reason` | string | `"rejected by filter"` | Failure reason written by `tag` |
//! | `conditions` | array | required | Conditions, or a single inline `field`/`operator`/`value` |
//!
//! Operators: `eq`, `ne`, `contains`, `starts_with`, `ends_with`, `regex`,
//! `exists`, `gt`, `lt`, `gte`, `lte`. Fields are slash-separated key paths.
//!
//! An event whose numeric comparison cannot be decided (the field holds a
//! non-number) is tagged failed and kept, whatever the action.
//!
//! # TOML Example
//!
//! ```toml
//! # Send 5xx responses on the health endpoint to the dead-letter queue
//! [[processors]]
//! type = "filter"
//! action = "tag"
//! tag_reason = "health check failed"
//!
//! [[processors.conditions]]
//! field = "http/path"
//! operator = "eq"
//! value = "/health"
//!
//! [[processors.conditions]]
//! field = "http/status"
//! operator = "gte"
//! value = 500
//! ```

mod condition;
mod config;

pub use condition::{Bound, Condition, Test};
pub use config::{FilterAction, FilterConfig, MatchMode};

use std::sync::atomic::{AtomicU64, Ordering};

use sluice_config::PluginConfig;
use sluice_protocol::{Event, Record};

use crate::registry::ProcessorFactory;
use crate::{Processor, ProcessorError, ProcessorFuture, ProcessorResult};

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

/// Counters for the filter processor
#[derive(Debug, Default)]
pub struct FilterMetrics {
    records_received: AtomicU64,
    records_passed: AtomicU64,
    records_dropped: AtomicU64,
    records_tagged: AtomicU64,
    records_undecided: AtomicU64,
}

impl FilterMetrics {
    pub fn snapshot(&self) -> FilterMetricsSnapshot {
        FilterMetricsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            records_passed: self.records_passed.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_tagged: self.records_tagged.load(Ordering::Relaxed),
            records_undecided: self.records_undecided.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time filter counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterMetricsSnapshot {
    pub records_received: u64,
    /// Left the processor untouched
    pub records_passed: u64,
    pub records_dropped: u64,
    /// Tagged failed by the `tag` action
    pub records_tagged: u64,
    /// Tagged failed because a condition could not be evaluated
    pub records_undecided: u64,
}

impl FilterMetricsSnapshot {
    /// Share of received records that were dropped (0.0 - 1.0)
    pub fn drop_rate(&self) -> f64 {
        if self.records_received == 0 {
            0.0
        } else {
            self.records_dropped as f64 / self.records_received as f64
        }
    }
}

/// Outcome for one event
enum Verdict {
    Pass,
    Drop,
    Tag(String),
}

/// Stateless filter over event conditions
pub struct FilterProcessor {
    config: FilterConfig,
    metrics: FilterMetrics,
}

impl FilterProcessor {
    pub fn new(config: FilterConfig) -> ProcessorResult<Self> {
        config.validate().map_err(ProcessorError::config)?;
        Ok(Self {
            config,
            metrics: FilterMetrics::default(),
        })
    }

    pub fn metrics(&self) -> FilterMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn matches(&self, event: &Event) -> Result<bool, String> {
        match self.config.match_mode {
            MatchMode::All => {
                for condition in &self.config.conditions {
                    if !condition.evaluate(event)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            MatchMode::Any => {
                for condition in &self.config.conditions {
                    if condition.evaluate(event)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn verdict(&self, event: &Event) -> Verdict {
        let matched = match self.matches(event) {
            Ok(matched) => matched,
            Err(reason) => {
                self.metrics.records_undecided.fetch_add(1, Ordering::Relaxed);
                return Verdict::Tag(reason);
            }
        };

        match (self.config.action, matched) {
            (FilterAction::Drop, true) | (FilterAction::Keep, false) => Verdict::Drop,
            (FilterAction::Tag, true) => {
                self.metrics.records_tagged.fetch_add(1, Ordering::Relaxed);
                Verdict::Tag(self.config.tag_reason.clone())
            }
            _ => Verdict::Pass,
        }
    }

    fn apply(&self, records: Vec<Record<Event>>) -> Vec<Record<Event>> {
        self.metrics
            .records_received
            .fetch_add(records.len() as u64, Ordering::Relaxed);

        let mut output = Vec::with_capacity(records.len());
        for mut record in records {
            match self.verdict(record.data()) {
                Verdict::Pass => {
                    self.metrics.records_passed.fetch_add(1, Ordering::Relaxed);
                    output.push(record);
                }
                Verdict::Tag(reason) => {
                    tracing::debug!(processor = "filter", reason = %reason, "record tagged as failed");
                    record.data_mut().tag_failure(reason);
                    output.push(record);
                }
                Verdict::Drop => {
                    // A dropped event is delivered as far as its source is concerned
                    if let Some(handle) = record.data().handle() {
                        handle.release(true);
                    }
                    self.metrics.records_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        output
    }
}

impl Processor for FilterProcessor {
    fn execute<'a>(&'a self, records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async move { Ok(self.apply(records)) })
    }

    fn name(&self) -> &'static str {
        "filter"
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }
}

impl std::fmt::Debug for FilterProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterProcessor")
            .field("action", &self.config.action)
            .field("match_mode", &self.config.match_mode)
            .field("conditions", &self.config.conditions.len())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

/// Factory for creating filter processors
#[derive(Debug, Clone, Copy)]
pub struct FilterFactory;

impl ProcessorFactory for FilterFactory {
    fn create(&self, config: &PluginConfig) -> ProcessorResult<Box<dyn Processor>> {
        let filter_config = FilterConfig::try_from(config).map_err(ProcessorError::config)?;
        Ok(Box::new(FilterProcessor::new(filter_config)?))
    }

    fn name(&self) -> &'static str {
        "filter"
    }
}

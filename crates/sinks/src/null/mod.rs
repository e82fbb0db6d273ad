//! Null sink - discards all data
//!
//! Used for benchmarking a pipeline without any I/O overhead. It counts the
//! batches and records it receives and drops them.
//!
//! # Example
//!
//! ```toml
//! [[sinks]]
//! type = "null"
//! ```

use async_trait::async_trait;
use sluice_config::PluginConfig;
use sluice_protocol::{Event, Record};

use crate::registry::SinkFactory;
use crate::{MetricsSnapshot, Sink, SinkMetrics, SinkResult};


/// Null sink that discards all received batches
#[derive(Debug)]
pub struct NullSink {
    name: String,
    metrics: SinkMetrics,
}

impl NullSink {
    /// Create a new null sink
    pub fn new() -> Self {
        Self::with_name("null")
    }

    /// Create a null sink with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metrics: SinkMetrics::new(),
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for NullSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn output(&self, records: &[Record<Event>]) -> SinkResult<()> {
        self.metrics.batch_received();
        let bytes: usize = records.iter().map(|r| r.data().estimated_size()).sum();
        self.metrics
            .batch_written(records.len() as u64, bytes as u64);
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Factory for creating null sinks
#[derive(Debug, Clone, Copy)]
pub struct NullSinkFactory;

impl SinkFactory for NullSinkFactory {
    fn create(&self, _config: &PluginConfig) -> SinkResult<Box<dyn Sink>> {
        Ok(Box::new(NullSink::new()))
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

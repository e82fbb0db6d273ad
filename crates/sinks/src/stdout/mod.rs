//! Stdout Sink - JSON lines on standard output
//!
//! Writes one JSON object per event. Intended for debugging and for piping
//! a pipeline's output into other tools, not for high throughput.
//!
//! # Example Output
//!
//! ```text
//! {"message":"started","sequence":1}
//! {"_type":"log","_time":"2026-01-01T00:00:00.000Z","message":"started","sequence":1}
//! ```
//!
//! The second form is produced with `include_metadata = true`.

use std::io::Write;

use async_trait::async_trait;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sluice_config::PluginConfig;
use sluice_protocol::{Event, Record};

use crate::registry::SinkFactory;
use crate::{MetricsSnapshot, Sink, SinkError, SinkMetrics, SinkResult};


/// Configuration for stdout sink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StdoutConfig {
    /// Prefix each line with the event type and receive time
    pub include_metadata: bool,
}

impl StdoutConfig {
    /// Create config that includes event metadata
    pub fn with_metadata() -> Self {
        Self {
            include_metadata: true,
        }
    }
}

impl From<&PluginConfig> for StdoutConfig {
    fn from(config: &PluginConfig) -> Self {
        Self {
            include_metadata: config.get_bool("include_metadata").unwrap_or(false),
        }
    }
}

/// Stdout sink for debug output
pub struct StdoutSink {
    name: String,
    config: StdoutConfig,
    writer: Mutex<Box<dyn Write + Send>>,
    metrics: SinkMetrics,
}

impl StdoutSink {
    /// Create a sink writing to standard output
    pub fn new(config: StdoutConfig) -> Self {
        Self::with_writer(config, Box::new(std::io::stdout()))
    }

    /// Create a sink writing to an arbitrary writer
    pub fn with_writer(config: StdoutConfig, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name: "stdout".into(),
            config,
            writer: Mutex::new(writer),
            metrics: SinkMetrics::new(),
        }
    }

    fn render(&self, event: &Event) -> Vec<u8> {
        if !self.config.include_metadata {
            return crate::json_line(event);
        }

        let metadata = event.metadata();
        let mut object = Map::with_capacity(event.data().len() + 2);
        object.insert("_type".into(), Value::String(metadata.event_type.clone()));
        object.insert(
            "_time".into(),
            Value::String(
                metadata
                    .time_received
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        );
        for (k, v) in event.data() {
            object.insert(k.clone(), v.clone());
        }

        // Map<String, Value> always serializes
        let mut line = serde_json::to_vec(&object).unwrap_or_default();
        line.push(b'\n');
        line
    }
}

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn output(&self, records: &[Record<Event>]) -> SinkResult<()> {
        self.metrics.batch_received();

        let mut out = Vec::new();
        for record in records {
            out.extend_from_slice(&self.render(record.data()));
        }

        let mut writer = self.writer.lock();
        if let Err(e) = writer.write_all(&out).and_then(|()| writer.flush()) {
            self.metrics.write_error();
            return Err(SinkError::Io(e));
        }
        drop(writer);

        self.metrics.flushed();
        self.metrics
            .batch_written(records.len() as u64, out.len() as u64);
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for StdoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdoutSink")
            .field("config", &self.config)
            .finish()
    }
}

/// Factory for creating stdout sinks
#[derive(Debug, Clone, Copy)]
pub struct StdoutSinkFactory;

impl SinkFactory for StdoutSinkFactory {
    fn create(&self, config: &PluginConfig) -> SinkResult<Box<dyn Sink>> {
        Ok(Box::new(StdoutSink::new(StdoutConfig::from(config))))
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

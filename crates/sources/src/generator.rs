//! Generator source - synthetic events
//!
//! Emits events shaped like:
//!
//! ```json
//! {"message": "generated event 42", "sequence": 42, "key": "key-10"}
//! ```
//!
//! The key field cycles through `key_space` values so stateful processors
//! see a bounded number of groups.
//!
//! # Example
//!
//! ```toml
//! [source]
//! type = "generator"
//! rate_per_sec = 1000
//! count = 100000
//! batch_size = 100
//! key_field = "trace_id"
//! key_space = 64
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use sluice_config::PluginConfig;
use sluice_protocol::{Event, Record};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::SourceFactory;
use crate::{
    MetricsSnapshot, Source, SourceContext, SourceError, SourceMetrics, SourceResult, write_batch,
};

#[cfg(test)]
#[path = "generator_test.rs"]
mod tests;

/// Generator source configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Event type of generated events
    pub event_type: String,

    /// Events per second; 0 means as fast as the buffer admits
    pub rate_per_sec: u64,

    /// Total events to emit; `None` runs until stopped
    pub count: Option<u64>,

    /// Events per buffer write
    pub batch_size: usize,

    /// Field carrying the synthetic key
    pub key_field: String,

    /// Number of distinct key values
    pub key_space: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            event_type: "log".into(),
            rate_per_sec: 100,
            count: None,
            batch_size: 100,
            key_field: "key".into(),
            key_space: 16,
        }
    }
}

impl GeneratorConfig {
    /// Set the rate
    #[must_use]
    pub fn with_rate(mut self, rate_per_sec: u64) -> Self {
        self.rate_per_sec = rate_per_sec;
        self
    }

    /// Set the total count
    #[must_use]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Set the batch size
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the key field and key space
    #[must_use]
    pub fn with_keys(mut self, key_field: impl Into<String>, key_space: u64) -> Self {
        self.key_field = key_field.into();
        self.key_space = key_space;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        if self.key_space == 0 {
            return Err("key_space must be greater than 0".into());
        }
        if self.key_field.is_empty() {
            return Err("key_field must not be empty".into());
        }
        Ok(())
    }

    /// Build the event for a sequence number
    pub fn event(&self, sequence: u64) -> Event {
        let mut data = Map::with_capacity(3);
        data.insert(
            "message".into(),
            Value::String(format!("generated event {}", sequence)),
        );
        data.insert("sequence".into(), json!(sequence));
        data.insert(
            self.key_field.clone(),
            Value::String(format!("key-{}", sequence % self.key_space)),
        );
        Event::from_map(self.event_type.clone(), data)
    }
}

impl TryFrom<&PluginConfig> for GeneratorConfig {
    type Error = String;

    fn try_from(config: &PluginConfig) -> Result<Self, Self::Error> {
        let defaults = Self::default();
        let non_negative = |key: &str| -> Result<Option<u64>, String> {
            match config.get_int(key) {
                None => Ok(None),
                Some(v) => u64::try_from(v)
                    .map(Some)
                    .map_err(|_| format!("{} must not be negative", key)),
            }
        };

        let batch_size = match non_negative("batch_size")? {
            Some(v) => usize::try_from(v).map_err(|_| "batch_size is too large".to_string())?,
            None => defaults.batch_size,
        };

        let parsed = Self {
            event_type: config
                .get_str("event_type")
                .map_or(defaults.event_type, str::to_string),
            rate_per_sec: non_negative("rate_per_sec")?.unwrap_or(defaults.rate_per_sec),
            count: non_negative("count")?,
            batch_size,
            key_field: config
                .get_str("key_field")
                .map_or(defaults.key_field, str::to_string),
            key_space: non_negative("key_space")?.unwrap_or(defaults.key_space),
        };
        parsed.validate()?;
        Ok(parsed)
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Source emitting synthetic events
pub struct GeneratorSource {
    config: GeneratorConfig,
    running: Mutex<Option<Running>>,
    metrics: Arc<SourceMetrics>,
}

impl GeneratorSource {
    pub fn new(config: GeneratorConfig) -> SourceResult<Self> {
        config.validate().map_err(SourceError::config)?;
        Ok(Self {
            config,
            running: Mutex::new(None),
            metrics: Arc::new(SourceMetrics::new()),
        })
    }

    /// Whether the generator task is still producing
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }
}

async fn generate(
    config: GeneratorConfig,
    context: SourceContext,
    metrics: Arc<SourceMetrics>,
    cancel: CancellationToken,
) {
    let mut sequence = 0u64;

    while !cancel.is_cancelled() {
        let n = match config.count {
            Some(total) if sequence >= total => {
                tracing::info!(pipeline = %context.pipeline, records = sequence, "generator finished");
                break;
            }
            Some(total) => (total - sequence).min(config.batch_size as u64),
            None => config.batch_size as u64,
        };

        let records: Vec<Record<Event>> = (sequence..sequence + n)
            .map(|seq| Record::new(config.event(seq)))
            .collect();
        sequence += n;
        metrics.received(n, 0);

        if let Err(e) = write_batch(&context, &metrics, records, &cancel).await {
            if !cancel.is_cancelled() {
                tracing::warn!(
                    pipeline = %context.pipeline,
                    error = %e,
                    "generator stopped after write failure"
                );
            }
            break;
        }

        if config.rate_per_sec > 0 {
            let delay = Duration::from_secs_f64(n as f64 / config.rate_per_sec as f64);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[async_trait]
impl Source for GeneratorSource {
    fn name(&self) -> &str {
        "generator"
    }

    async fn start(&self, context: SourceContext) -> SourceResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(SourceError::AlreadyRunning("generator".into()));
        }

        tracing::info!(
            pipeline = %context.pipeline,
            rate_per_sec = self.config.rate_per_sec,
            count = ?self.config.count,
            "generator source starting"
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(generate(
            self.config.clone(),
            context,
            Arc::clone(&self.metrics),
            cancel.clone(),
        ));
        *running = Some(Running { cancel, task });
        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            tracing::warn!(error = %e, "generator task ended abnormally");
        }
        tracing::info!("generator source stopped");
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for GeneratorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorSource")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Factory for creating generator sources
#[derive(Debug, Clone, Copy)]
pub struct GeneratorFactory;

impl SourceFactory for GeneratorFactory {
    fn create(&self, config: &PluginConfig) -> SourceResult<Box<dyn Source>> {
        let generator_config = GeneratorConfig::try_from(config).map_err(SourceError::config)?;
        Ok(Box::new(GeneratorSource::new(generator_config)?))
    }

    fn name(&self) -> &'static str {
        "generator"
    }
}

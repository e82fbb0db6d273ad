//! Pipeline, buffer and circuit breaker settings
//!
//! # Example
//!
//! ```toml
//! [pipeline]
//! name = "traces"
//! workers = 8
//! batch_size = 250
//!
//! [buffer]
//! capacity = 50000
//! redelivery_timeout_ms = 60000
//!
//! [circuit_breakers.memory]
//! usage_bytes = 4294967296
//! ```

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Pipeline engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pipeline name, used in logs, metrics and peer requests
    pub name: String,

    /// Number of worker tasks draining the buffer (default: CPU cores)
    pub workers: usize,

    /// Maximum records per buffer read
    pub batch_size: usize,

    /// How long a worker waits for data on each read
    pub read_timeout_ms: u64,

    /// Time allowed for in-flight workers to finish on stop before they are aborted
    pub shutdown_grace_secs: u64,

    /// Time allowed to drain buffered records on stop
    pub drain_timeout_secs: u64,

    /// Track end-to-end acknowledgements back to the source
    pub acknowledgements: bool,

    /// Acknowledgement sets not completed within this window complete as failed
    pub acknowledgement_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            workers: num_cpus(),
            batch_size: 125,
            read_timeout_ms: 1000,
            shutdown_grace_secs: 30,
            drain_timeout_secs: 10,
            acknowledgements: false,
            acknowledgement_timeout_secs: 300,
        }
    }
}

impl PipelineConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn acknowledgement_timeout(&self) -> Duration {
        Duration::from_secs(self.acknowledgement_timeout_secs)
    }
}

/// Buffer sizing and timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Maximum records held (available + in flight)
    pub capacity: usize,

    /// Optional cap on the estimated byte size of held records
    pub max_bytes: Option<usize>,

    /// How long a read window may stay uncommitted before it is redelivered
    pub redelivery_timeout_ms: u64,

    /// How long a source write may wait for space
    pub write_timeout_ms: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: 12_800,
            max_bytes: None,
            redelivery_timeout_ms: 30_000,
            write_timeout_ms: 1000,
        }
    }
}

impl BufferSettings {
    pub fn redelivery_timeout(&self) -> Duration {
        Duration::from_millis(self.redelivery_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Dead-letter destination for records that cannot be processed or forwarded
#[derive(Debug, Clone, Deserialize)]
pub struct DeadLetterConfig {
    /// JSON lines file receiving dead-lettered records
    pub path: PathBuf,
}

/// Configured circuit breakers
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CircuitBreakersConfig {
    /// Opens when process memory usage crosses a threshold
    pub memory: Option<MemoryBreakerConfig>,
}

/// Memory usage breaker
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryBreakerConfig {
    /// Used memory (bytes) at or above which the breaker opens
    pub usage_bytes: u64,

    /// Minimum time the breaker stays open once tripped
    pub reset_ms: u64,

    /// Sampling interval of the resource monitor
    pub check_interval_ms: u64,
}

impl Default for MemoryBreakerConfig {
    fn default() -> Self {
        Self {
            usage_bytes: 4 * 1024 * 1024 * 1024,
            reset_ms: 1000,
            check_interval_ms: 500,
        }
    }
}

impl MemoryBreakerConfig {
    pub fn reset(&self) -> Duration {
        Duration::from_millis(self.reset_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.name, "default");
        assert!(config.workers > 0);
        assert_eq!(config.batch_size, 125);
        assert_eq!(config.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
        assert!(!config.acknowledgements);
    }

    #[test]
    fn test_buffer_settings() {
        let toml = r#"
capacity = 100
max_bytes = 65536
redelivery_timeout_ms = 500
"#;
        let config: BufferSettings = toml::from_str(toml).unwrap();
        assert_eq!(config.capacity, 100);
        assert_eq!(config.max_bytes, Some(65536));
        assert_eq!(config.redelivery_timeout(), Duration::from_millis(500));
        assert_eq!(config.write_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_memory_breaker_partial() {
        let config: CircuitBreakersConfig =
            toml::from_str("[memory]\nusage_bytes = 1024").unwrap();
        let memory = config.memory.unwrap();
        assert_eq!(memory.usage_bytes, 1024);
        assert_eq!(memory.reset(), Duration::from_secs(1));
        assert_eq!(memory.check_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_no_breakers_by_default() {
        let config: CircuitBreakersConfig = toml::from_str("").unwrap();
        assert!(config.memory.is_none());
    }
}

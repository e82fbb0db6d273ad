//! Sluice Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! An empty file is a valid config: a generator source feeding stdout.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use sluice_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[[sinks]]\ntype = \"null\"").unwrap();
//! assert_eq!(config.sinks[0].plugin_type, "null");
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [pipeline]
//! name = "traces"
//! workers = 4
//!
//! [source]
//! type = "tcp"
//! address = "0.0.0.0:5170"
//!
//! [[processors]]
//! type = "aggregate"
//! identification_keys = ["trace_id"]
//!
//! [[sinks]]
//! type = "file"
//! path = "out/traces.jsonl"
//!
//! [peer_forwarder]
//! enabled = true
//! local_address = "10.0.0.1:4994"
//! peers = ["10.0.0.1:4994", "10.0.0.2:4994"]
//! ```

mod error;
mod logging;
mod peer;
mod pipeline;
mod plugin;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use peer::{Discovery, ExhaustedPolicy, PeerForwarderConfig};
pub use pipeline::{
    BufferSettings, CircuitBreakersConfig, DeadLetterConfig, MemoryBreakerConfig, PipelineConfig,
};
pub use plugin::PluginConfig;

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Pipeline engine settings
    pub pipeline: PipelineConfig,

    /// Buffer between source and workers
    pub buffer: BufferSettings,

    /// The pipeline's single source
    pub source: PluginConfig,

    /// Processors, applied in declared order
    pub processors: Vec<PluginConfig>,

    /// Sinks, every batch is written to all enabled sinks
    pub sinks: Vec<PluginConfig>,

    /// Dead-letter destination (optional)
    pub dead_letter: Option<DeadLetterConfig>,

    /// Cross-node routing for stateful processors
    pub peer_forwarder: PeerForwarderConfig,

    /// Admission gates consulted before buffer writes
    pub circuit_breakers: CircuitBreakersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            pipeline: PipelineConfig::default(),
            buffer: BufferSettings::default(),
            source: PluginConfig::new("generator"),
            processors: Vec::new(),
            sinks: vec![PluginConfig::new("stdout")],
            dead_letter: None,
            peer_forwarder: PeerForwarderConfig::default(),
            circuit_breakers: CircuitBreakersConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML, or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    ///
    /// Prefer using the `FromStr` trait implementation.
    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Enabled processors, in declared order
    pub fn enabled_processors(&self) -> impl Iterator<Item = &PluginConfig> {
        self.processors.iter().filter(|p| p.enabled)
    }

    /// Enabled sinks
    pub fn enabled_sinks(&self) -> impl Iterator<Item = &PluginConfig> {
        self.sinks.iter().filter(|s| s.enabled)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.pipeline.name, "default");
        assert_eq!(config.buffer.capacity, 12_800);
        assert_eq!(config.source.plugin_type, "generator");
        assert!(config.processors.is_empty());
        assert_eq!(config.sinks.len(), 1);
        assert_eq!(config.sinks[0].plugin_type, "stdout");
        assert!(config.dead_letter.is_none());
        assert!(!config.peer_forwarder.enabled);
        assert!(config.circuit_breakers.memory.is_none());
    }

    #[test]
    fn test_minimal_config() {
        let toml = r#"
[source]
type = "tcp"
address = "127.0.0.1:5170"

[[sinks]]
type = "null"
"#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.source.plugin_type, "tcp");
        assert_eq!(config.source.get_str("address"), Some("127.0.0.1:5170"));
        assert_eq!(config.sinks.len(), 1);
        assert_eq!(config.sinks[0].plugin_type, "null");
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[log]
level = "debug"
format = "json"

[pipeline]
name = "traces"
workers = 2
batch_size = 50
acknowledgements = true

[buffer]
capacity = 1000
max_bytes = 1048576

[source]
type = "generator"
count = 100

[[processors]]
type = "filter"
action = "drop"
conditions = [{ field = "level", operator = "eq", value = "debug" }]

[[processors]]
type = "aggregate"
identification_keys = ["trace_id"]

[[processors]]
type = "noop"
enabled = false

[[sinks]]
type = "stdout"

[[sinks]]
type = "file"
path = "/tmp/out.jsonl"

[dead_letter]
path = "/tmp/dlq.jsonl"

[peer_forwarder]
enabled = true
local_address = "10.0.0.1:4994"
peers = ["10.0.0.1:4994", "10.0.0.2:4994"]
on_exhausted = "dead_letter"

[circuit_breakers.memory]
usage_bytes = 1073741824
"#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.pipeline.name, "traces");
        assert_eq!(config.pipeline.workers, 2);
        assert!(config.pipeline.acknowledgements);
        assert_eq!(config.buffer.max_bytes, Some(1_048_576));
        assert_eq!(config.source.get_int("count"), Some(100));
        assert_eq!(config.processors.len(), 3);
        assert_eq!(config.enabled_processors().count(), 2);
        assert_eq!(config.enabled_sinks().count(), 2);
        assert!(config.dead_letter.is_some());
        assert_eq!(config.peer_forwarder.on_exhausted, ExhaustedPolicy::DeadLetter);
        assert_eq!(
            config.circuit_breakers.memory.map(|m| m.usage_bytes),
            Some(1_073_741_824)
        );
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_str("this is not valid toml [[[");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nname = \"from-file\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.name, "from-file");
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/nonexistent/sluice.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/sluice.toml"));
    }
}

//! Plugin instance configuration
//!
//! Sources, processors and sinks are declared the same way: a `type` that
//! selects the factory, an optional `enabled` flag, and free-form options
//! interpreted by the factory.
//!
//! # Example
//!
//! ```toml
//! [source]
//! type = "tcp"
//! address = "0.0.0.0:5170"
//!
//! [[processors]]
//! type = "aggregate"
//! identification_keys = ["trace_id"]
//! window_ms = 5000
//!
//! [[sinks]]
//! type = "file"
//! path = "out/events.jsonl"
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for a single plugin instance
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginConfig {
    /// Plugin type (e.g., "generator", "filter", "stdout")
    #[serde(rename = "type")]
    pub plugin_type: String,

    /// Whether this plugin is enabled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Type-specific options passed to the plugin factory
    #[serde(flatten)]
    pub options: HashMap<String, toml::Value>,
}

fn default_true() -> bool {
    true
}

impl PluginConfig {
    /// Create an enabled plugin config with no options
    pub fn new(plugin_type: impl Into<String>) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            enabled: true,
            options: HashMap::new(),
        }
    }

    /// Add an option
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Disable the plugin
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Get an array option as Vec<String>
    pub fn get_string_array(&self, key: &str) -> Option<Vec<String>> {
        self.options.get(key).and_then(|v| {
            v.as_array().map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
        })
    }

    /// Get an option as bool
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|v| v.as_bool())
    }

    /// Get an option as f64 (integers are widened)
    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.options.get(key).and_then(|v| {
            v.as_float()
                .or_else(|| v.as_integer().map(|i| i as f64))
        })
    }

    /// Get an option as i64
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.options.get(key).and_then(|v| v.as_integer())
    }

    /// Get a non-negative integer option as u64
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_int(key).and_then(|i| u64::try_from(i).ok())
    }

    /// Get an option as string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Get an option as PathBuf
    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }
}

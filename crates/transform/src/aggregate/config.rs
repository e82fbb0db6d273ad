//! Aggregate processor configuration

use sluice_config::PluginConfig;
use sluice_protocol::KeyPath;
use std::time::Duration;

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

/// Configuration for the aggregate processor
#[derive(Debug, Clone)]
pub struct AggregateConfig {
    /// Whether the processor is enabled
    pub enabled: bool,

    /// Fields whose values identify a group
    ///
    /// Also used by the peer forwarder to route every event of a group to
    /// the same node.
    pub identification_keys: Vec<KeyPath>,

    /// How long a group stays open after its first event (milliseconds)
    pub window_ms: u64,

    /// A group closes as soon as it holds this many events
    pub max_events: u64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            identification_keys: Vec::new(),
            window_ms: 5000,
            max_events: 1000,
        }
    }
}

impl AggregateConfig {
    /// Create a config grouping by the given keys
    pub fn new(identification_keys: Vec<KeyPath>) -> Self {
        Self {
            identification_keys,
            ..Self::default()
        }
    }

    /// Set the window in milliseconds
    #[must_use]
    pub fn with_window_ms(mut self, ms: u64) -> Self {
        self.window_ms = ms;
        self
    }

    /// Set maximum events per group
    #[must_use]
    pub fn with_max_events(mut self, max: u64) -> Self {
        self.max_events = max;
        self
    }

    /// Disable the processor
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Window duration
    #[inline]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.identification_keys.is_empty() {
            return Err("identification_keys must not be empty".to_string());
        }
        if self.window_ms == 0 {
            return Err("window_ms must be greater than 0".to_string());
        }
        if self.max_events == 0 {
            return Err("max_events must be at least 1".to_string());
        }
        Ok(())
    }
}

impl TryFrom<&PluginConfig> for AggregateConfig {
    type Error = String;

    fn try_from(config: &PluginConfig) -> Result<Self, Self::Error> {
        let mut aggregate_config = AggregateConfig {
            enabled: config.enabled,
            ..AggregateConfig::default()
        };

        if let Some(keys) = config.get_string_array("identification_keys") {
            aggregate_config.identification_keys = keys
                .iter()
                .map(|k| KeyPath::parse(k).map_err(|e| e.to_string()))
                .collect::<Result<_, _>>()?;
        }

        if let Some(window_ms) = config.get_int("window_ms") {
            aggregate_config.window_ms =
                u64::try_from(window_ms).map_err(|_| "window_ms must not be negative")?;
        }

        if let Some(max_events) = config.get_int("max_events") {
            aggregate_config.max_events =
                u64::try_from(max_events).map_err(|_| "max_events must not be negative")?;
        }

        aggregate_config.validate()?;
        Ok(aggregate_config)
    }
}

//! Sink Registry - Config-driven sink creation
//!
//! # Example
//!
//! ```ignore
//! let registry = sluice_sinks::default_registry();
//! let sink = registry.create(&PluginConfig::new("stdout"))?;
//! ```

use crate::{Sink, SinkError, SinkResult};
use sluice_config::PluginConfig;
use std::collections::HashMap;

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;

/// Factory trait for creating sinks
pub trait SinkFactory: Send + Sync {
    /// Create a sink instance from configuration
    ///
    /// # Errors
    /// Returns `SinkError::Config` if configuration is invalid
    fn create(&self, config: &PluginConfig) -> SinkResult<Box<dyn Sink>>;

    /// Human-readable name for this factory (for error messages)
    fn name(&self) -> &'static str;
}

/// Registry for sink factories
pub struct SinkRegistry {
    factories: HashMap<String, Box<dyn SinkFactory>>,
}

impl SinkRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a sink factory
    ///
    /// # Panics
    /// Panics if a factory is already registered with this name.
    /// Use `try_register` for fallible registration.
    pub fn register<F: SinkFactory + 'static>(&mut self, type_name: &str, factory: F) {
        if !self.try_register(type_name, factory) {
            panic!("Sink factory '{}' already registered", type_name);
        }
    }

    /// Try to register a sink factory
    ///
    /// Returns `false` if a factory is already registered with this name.
    pub fn try_register<F: SinkFactory + 'static>(&mut self, type_name: &str, factory: F) -> bool {
        if self.factories.contains_key(type_name) {
            return false;
        }
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
        true
    }

    /// Create a sink from its plugin configuration
    pub fn create(&self, config: &PluginConfig) -> SinkResult<Box<dyn Sink>> {
        let factory = self.factories.get(&config.plugin_type).ok_or_else(|| {
            SinkError::config(format!(
                "unknown sink type '{}', available: [{}]",
                config.plugin_type,
                self.available_types().join(", ")
            ))
        })?;

        factory.create(config)
    }

    /// Check if a sink type is registered
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered sink types, sorted
    pub fn available_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Get the number of registered factories
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

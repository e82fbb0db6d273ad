//! Source Registry - Config-driven source creation

use crate::{Source, SourceError, SourceResult};
use sluice_config::PluginConfig;
use std::collections::HashMap;

/// Factory trait for creating sources
pub trait SourceFactory: Send + Sync {
    /// Create a source instance from configuration
    fn create(&self, config: &PluginConfig) -> SourceResult<Box<dyn Source>>;

    /// Human-readable name for this factory (for error messages)
    fn name(&self) -> &'static str;
}

/// Registry for source factories
pub struct SourceRegistry {
    factories: HashMap<String, Box<dyn SourceFactory>>,
}

impl SourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a source factory
    ///
    /// # Panics
    /// Panics if a factory is already registered with this name.
    pub fn register<F: SourceFactory + 'static>(&mut self, type_name: &str, factory: F) {
        if !self.try_register(type_name, factory) {
            panic!("Source factory '{}' already registered", type_name);
        }
    }

    /// Try to register a source factory
    ///
    /// Returns `false` if a factory is already registered with this name.
    pub fn try_register<F: SourceFactory + 'static>(&mut self, type_name: &str, factory: F) -> bool {
        if self.factories.contains_key(type_name) {
            return false;
        }
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
        true
    }

    /// Create a source from its plugin configuration
    pub fn create(&self, config: &PluginConfig) -> SourceResult<Box<dyn Source>> {
        let factory = self.factories.get(&config.plugin_type).ok_or_else(|| {
            SourceError::config(format!(
                "unknown source type '{}', available: [{}]",
                config.plugin_type,
                self.available_types().join(", ")
            ))
        })?;

        factory.create(config)
    }

    /// Check if a source type is registered
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered source types, sorted
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

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

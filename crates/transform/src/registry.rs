//! Processor Registry - Config-driven processor creation
//!
//! The registry maps processor type names to factories, enabling
//! configuration-driven processor instantiation.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = ProcessorRegistry::new();
//! registry.register("noop", NoopFactory);
//!
//! // From config
//! let processor = registry.create(&PluginConfig::new("noop"))?;
//! ```

use crate::{Processor, ProcessorError, ProcessorResult};
use sluice_config::PluginConfig;
use std::collections::HashMap;

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;

/// Factory trait for creating processors
///
/// Implement this trait to register custom processors with the registry.
pub trait ProcessorFactory: Send + Sync {
    /// Create a processor instance from configuration
    ///
    /// # Errors
    /// Returns `ProcessorError::Config` if configuration is invalid
    fn create(&self, config: &PluginConfig) -> ProcessorResult<Box<dyn Processor>>;

    /// Human-readable name for this factory (for error messages)
    fn name(&self) -> &'static str;
}

/// Registry for processor factories
pub struct ProcessorRegistry {
    factories: HashMap<String, Box<dyn ProcessorFactory>>,
}

impl ProcessorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a processor factory
    ///
    /// # Panics
    /// Panics if a factory is already registered with this name.
    /// Use `try_register` for fallible registration.
    pub fn register<F: ProcessorFactory + 'static>(&mut self, type_name: &str, factory: F) {
        if self.factories.contains_key(type_name) {
            panic!("Processor factory '{}' already registered", type_name);
        }
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
    }

    /// Try to register a processor factory
    ///
    /// Returns `false` if a factory is already registered with this name.
    pub fn try_register<F: ProcessorFactory + 'static>(
        &mut self,
        type_name: &str,
        factory: F,
    ) -> bool {
        if self.factories.contains_key(type_name) {
            return false;
        }
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
        true
    }

    /// Create a processor from its plugin configuration
    ///
    /// # Errors
    /// - `ProcessorError::Config` if the type is not registered
    /// - Any error returned by the factory
    pub fn create(&self, config: &PluginConfig) -> ProcessorResult<Box<dyn Processor>> {
        let factory = self.factories.get(&config.plugin_type).ok_or_else(|| {
            ProcessorError::config(format!(
                "unknown processor type '{}', available: [{}]",
                config.plugin_type,
                self.available_types().join(", ")
            ))
        })?;

        factory.create(config)
    }

    /// Check if a processor type is registered
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered processor types, sorted
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

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Processor error types
//!
//! Errors returned from a processor fail the whole batch. Problems with a
//! single record are reported by tagging the record instead.

use sluice_protocol::EventError;
use thiserror::Error;

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

/// Errors that can occur while building or running processors
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Processing logic failed for the whole batch
    #[error("processing failed: {0}")]
    Failed(String),

    /// Event data could not be addressed
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// Processor has already been shut down
    #[error("processor '{0}' is shut down")]
    ShutDown(&'static str),
}

impl ProcessorError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a processing failed error
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

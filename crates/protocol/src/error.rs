//! Protocol error types

use thiserror::Error;

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

/// Errors raised when addressing or mutating event data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The key path is syntactically invalid
    #[error("invalid key '{key}': {reason}")]
    InvalidKey {
        /// The offending key as given
        key: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// No value exists at the key path
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A value on the path is not an object, so it cannot be descended into
    #[error("value at '{0}' is not an object")]
    NotAnObject(String),
}

impl EventError {
    /// Create an InvalidKey error
    pub fn invalid_key(key: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason,
        }
    }

    /// Create a KeyNotFound error
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound(key.into())
    }
}

/// Errors raised by the peer wire framing
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame exceeds the maximum allowed size
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared or encoded frame size
        size: usize,
        /// Maximum permitted size
        max: usize,
    },

    /// Payload could not be serialized or deserialized
    #[error("invalid frame payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Payload decoded but is not an event object
    #[error("invalid event: {0}")]
    Event(#[from] EventError),
}

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventError>;

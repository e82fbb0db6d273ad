//! Buffer error types

use thiserror::Error;

/// Errors returned by buffer operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// No space became available before the write timeout
    #[error("buffer '{buffer}' full: {capacity} records")]
    Full {
        /// Buffer name
        buffer: String,
        /// Configured capacity in records
        capacity: usize,
    },

    /// The records can never be enqueued (capacity misconfiguration)
    #[error("buffer write rejected: {0}")]
    Write(String),

    /// The checkpoint does not match an outstanding read window
    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// A circuit breaker blocked admission until the timeout
    #[error("circuit breaker '{0}' open")]
    CircuitOpen(String),

    /// The buffer no longer accepts writes
    #[error("buffer is shut down")]
    ShutDown,
}

impl BufferError {
    /// Create a Full error
    pub fn full(buffer: impl Into<String>, capacity: usize) -> Self {
        Self::Full {
            buffer: buffer.into(),
            capacity,
        }
    }

    /// Create a Write error
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    /// Create an InvalidCheckpoint error
    pub fn invalid_checkpoint(msg: impl Into<String>) -> Self {
        Self::InvalidCheckpoint(msg.into())
    }

    /// Transient admission errors that the writer should retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Full { .. } | Self::CircuitOpen(_))
    }
}

/// Result type for buffer operations
pub type Result<T> = std::result::Result<T, BufferError>;

//! Pipeline error types
//!
//! Lifecycle errors returned by [`Pipeline`](crate::Pipeline) operations.
//! Batch failures never surface here; they are counted and published as
//! [`FailureReport`](crate::FailureReport)s.

use std::time::Duration;

use sluice_buffer::BufferError;
use sluice_sinks::SinkError;
use sluice_sources::SourceError;
use sluice_transform::ProcessorError;
use thiserror::Error;

use crate::state::PipelineState;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Operation not allowed in the current lifecycle state
    #[error("pipeline '{pipeline}' is {actual}, expected {expected}")]
    InvalidState {
        pipeline: String,
        expected: PipelineState,
        actual: PipelineState,
    },

    /// The source could not be started
    #[error("source failed to start: {0}")]
    SourceStart(#[from] SourceError),

    /// A sink failed to initialize
    #[error("sink '{sink}' failed to initialize: {source}")]
    SinkInitialize {
        sink: String,
        #[source]
        source: SinkError,
    },

    /// A sink could not be built from configuration
    #[error("sink configuration error: {0}")]
    Sink(SinkError),

    /// A processor could not be built from configuration
    #[error("processor configuration error: {0}")]
    Processor(#[from] ProcessorError),

    /// Buffer protocol error
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Workers did not finish within the grace period and were aborted
    #[error("workers did not stop within {0:?}; in-flight windows left uncommitted")]
    ShutdownTimeout(Duration),

    /// The pipeline definition is incomplete or inconsistent
    #[error("invalid pipeline: {0}")]
    Config(String),
}

impl PipelineError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn invalid_state(
        pipeline: &str,
        expected: PipelineState,
        actual: PipelineState,
    ) -> Self {
        Self::InvalidState {
            pipeline: pipeline.to_string(),
            expected,
            actual,
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

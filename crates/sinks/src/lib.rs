//! Sluice - Sinks
//!
//! Output stages for sluice pipelines.
//!
//! # Architecture
//!
//! Every worker hands its surviving batch to each configured sink. The
//! engine treats an `Err` from [`Sink::output`] as a failed batch: the read
//! window is not checkpointed and the records are redelivered. A sink that
//! needs partial-success semantics retries internally and returns `Ok` only
//! once the whole batch is handled.
//!
//! ```text
//! [Worker] --&[Record<Event>]--> [Sink 1]
//!                            \--> [Sink 2]
//! ```
//!
//! # Available Sinks
//!
//! | Sink | Purpose |
//! |------|---------|
//! | `null` | Benchmarking (discard all) |
//! | `stdout` | One JSON line per event |
//! | `file` | Append JSON lines to a file |
//!
//! Records the pipeline cannot process are written to a
//! [`DeadLetterQueue`] instead of a sink.

// =============================================================================
// Sink implementations (each in its own submodule)
// =============================================================================

/// Null sink - discards all data (for benchmarking)
pub mod null;

/// Stdout sink - JSON lines on standard output
pub mod stdout;

/// File sink - JSON lines appended to a file
pub mod file;

// =============================================================================
// Shared
// =============================================================================

/// Dead-letter queue for records that could not be processed
pub mod dead_letter;

/// Config-driven sink creation
pub mod registry;

/// Common types shared by all sinks (errors, metrics)
mod common;

// =============================================================================
// Public re-exports
// =============================================================================

pub use common::{MetricsSnapshot, SinkError, SinkMetrics, SinkResult};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue, FileDeadLetterQueue};
pub use file::{FileSink, FileSinkConfig, FileSinkFactory};
pub use null::{NullSink, NullSinkFactory};
pub use registry::{SinkFactory, SinkRegistry};
pub use stdout::{StdoutSink, StdoutSinkFactory};

use async_trait::async_trait;
use sluice_protocol::{Event, Record};

/// Output stage of a pipeline
///
/// One instance is shared by every worker, so `output` may be called
/// concurrently; implementations synchronize internally.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name of this sink for logging and metrics
    fn name(&self) -> &str;

    /// Prepare the sink (open files, connect)
    ///
    /// Called once before the pipeline starts its source. An error here is
    /// a pipeline lifecycle failure.
    async fn initialize(&self) -> SinkResult<()> {
        Ok(())
    }

    /// Whether the sink can accept `output` calls
    fn is_ready(&self) -> bool {
        true
    }

    /// Deliver a batch
    ///
    /// Any error fails the whole batch.
    async fn output(&self, records: &[Record<Event>]) -> SinkResult<()>;

    /// Flush and release resources
    async fn shutdown(&self) -> SinkResult<()> {
        Ok(())
    }

    /// Metrics for this sink
    fn metrics(&self) -> MetricsSnapshot;
}

/// Create a registry with all built-in sinks
///
/// Includes:
/// - `null` - Discards everything
/// - `stdout` - JSON lines on standard output
/// - `file` - JSON lines appended to a file
pub fn default_registry() -> SinkRegistry {
    let mut registry = SinkRegistry::new();
    registry.register("null", NullSinkFactory);
    registry.register("stdout", StdoutSinkFactory);
    registry.register("file", FileSinkFactory);
    registry
}

/// Serialize one event as a JSON line including the trailing newline
pub(crate) fn json_line(event: &Event) -> Vec<u8> {
    let mut line = event.to_json_string().into_bytes();
    line.push(b'\n');
    line
}

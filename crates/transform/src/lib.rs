//! Sluice - Transform
//!
//! Processors applied to record batches between the buffer and the sinks.
//!
//! # Overview
//!
//! A processor consumes an ordered batch of records and returns an ordered
//! batch, possibly of a different length. Processors may:
//! - Filter records
//! - Enrich or rewrite event data
//! - Split one record into many, or combine many into one
//! - Tag individual records as failed
//!
//! # Architecture
//!
//! ```text
//! [Vec<Record>] → [Processor 1] → [Processor 2] → ... → [Vec<Record>']
//! ```
//!
//! Processors are applied in declared order by [`ProcessorChain`].
//!
//! # Failure model
//!
//! - A problem with one record is recorded with [`Event::tag_failure`] and
//!   the record continues through the chain; the engine routes it to the
//!   dead-letter path when one is configured.
//! - Returning `Err` fails the whole batch. The engine does not checkpoint
//!   it, so it is redelivered.
//!
//! # Peer forwarding
//!
//! A processor that keeps per-key state returns its identification keys
//! from [`Processor::identification_keys`]. The engine routes each batch
//! through the peer forwarder before such a processor so that every record
//! for a key reaches the same node.
//!
//! # Acknowledgements
//!
//! A processor that drops a record releases its handle with `true`. A
//! processor that emits a record built from others gives it a handle from
//! [`EventHandle::derive`](sluice_protocol::EventHandle::derive) and merges
//! the handles of the other inputs into it.
//!
//! # Modules
//!
//! - `chain` - Sequential processor execution
//! - `registry` - Processor creation from config
//! - `noop` - Pass-through processor
//! - `filter` - Drop, keep or tag events based on conditions
//! - `aggregate` - Stateful per-key aggregation

mod chain;
mod error;
pub mod aggregate;
pub mod filter;
pub mod noop;
pub mod registry;

pub use aggregate::{AggregateConfig, AggregateFactory, AggregateMetrics, AggregateProcessor};
pub use chain::ProcessorChain;
pub use error::ProcessorError;
pub use filter::{
    Bound, Condition, FilterAction, FilterConfig, FilterFactory, FilterMetrics,
    FilterMetricsSnapshot, FilterProcessor, MatchMode, Test,
};
pub use noop::{NoopFactory, NoopProcessor};
pub use registry::{ProcessorFactory, ProcessorRegistry};

use sluice_protocol::{Event, KeyPath, Record};
use std::future::Future;
use std::pin::Pin;

/// Result type for processor operations
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Future returned by [`Processor::execute`]
pub type ProcessorFuture<'a> =
    Pin<Box<dyn Future<Output = ProcessorResult<Vec<Record<Event>>>> + Send + 'a>>;

/// Trait for batch processors
///
/// Implementors must be `Send + Sync`; one instance is shared by every
/// worker of a pipeline. Processors holding cross-batch state must either
/// synchronize it internally or return `true` from
/// [`requires_exclusive`](Self::requires_exclusive).
///
/// # Example
///
/// ```ignore
/// struct Upper;
///
/// impl Processor for Upper {
///     fn execute<'a>(&'a self, mut records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
///         Box::pin(async move {
///             for record in &mut records {
///                 // ...
///             }
///             Ok(records)
///         })
///     }
///
///     fn name(&self) -> &'static str {
///         "upper"
///     }
/// }
/// ```
pub trait Processor: Send + Sync {
    /// Process a batch, returning the resulting batch
    ///
    /// Called with an empty batch when no new data arrived, so that
    /// time-based processors can emit on schedule.
    fn execute<'a>(&'a self, records: Vec<Record<Event>>) -> ProcessorFuture<'a>;

    /// Name of this processor for logging and metrics
    fn name(&self) -> &'static str;

    /// Identification keys used to partition records across the fleet
    ///
    /// `Some` means every record for a key must reach the same node.
    fn identification_keys(&self) -> Option<&[KeyPath]> {
        None
    }

    /// Whether calls to `execute` must not overlap across workers
    fn requires_exclusive(&self) -> bool {
        false
    }

    /// Whether this processor is enabled
    ///
    /// Disabled processors are filtered out of chains at construction time.
    fn enabled(&self) -> bool {
        true
    }

    /// Start flushing held state; later `execute` calls emit everything
    fn prepare_for_shutdown(&self) {}

    /// Whether all held state has been emitted
    fn is_ready_for_shutdown(&self) -> bool {
        true
    }

    /// Release resources; called once after the last `execute`
    fn shutdown(&self) -> ProcessorResult<()> {
        Ok(())
    }
}

/// Create a registry with all built-in processors
///
/// Includes:
/// - `noop` - Pass-through processor
/// - `filter` - Drop, keep or tag events based on conditions
/// - `aggregate` - Per-key aggregation (requires peer forwarding)
pub fn default_registry() -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry.register("noop", NoopFactory);
    registry.register("filter", FilterFactory);
    registry.register("aggregate", AggregateFactory);
    registry
}

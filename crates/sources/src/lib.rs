//! Sluice - Sources
//!
//! Sources produce events into a pipeline's buffer.
//!
//! # Available Sources
//!
//! - **generator** - Synthetic events at a configured rate, for load and
//!   smoke testing
//! - **tcp** - Newline-delimited JSON objects over TCP
//!
//! # Write path
//!
//! Every source writes through the [`GatedWriter`](sluice_buffer::GatedWriter)
//! in its [`SourceContext`]. While the circuit breaker is open or the buffer
//! is full the write is retried with backoff; nothing is dropped until the
//! source is stopped.
//!
//! # Acknowledgements
//!
//! When the context carries an acknowledgement manager, each written batch
//! becomes one acknowledgement set. Its outcome is counted in the source
//! metrics.

mod common;
mod generator;
mod registry;
mod tcp;

pub use common::{MetricsSnapshot, SourceContext, SourceError, SourceMetrics, SourceResult};
pub use generator::{GeneratorConfig, GeneratorFactory, GeneratorSource};
pub use registry::{SourceFactory, SourceRegistry};
pub use tcp::{TcpSource, TcpSourceConfig, TcpSourceFactory};

use std::sync::Arc;

use async_trait::async_trait;
use sluice_protocol::{Event, EventHandle, Record};
use tokio_util::sync::CancellationToken;

/// Producer of events for a pipeline
#[async_trait]
pub trait Source: Send + Sync {
    /// Name of this source for logging
    fn name(&self) -> &str;

    /// Begin producing into the context's buffer
    ///
    /// Returns once production is running on background tasks. Errors here
    /// (for example a failed bind) mean the source never started.
    async fn start(&self, context: SourceContext) -> SourceResult<()>;

    /// Stop producing and wait for background tasks to finish
    ///
    /// Idempotent; calling it on a source that never started is a no-op.
    async fn stop(&self);

    /// Metrics for this source
    fn metrics(&self) -> MetricsSnapshot;
}

/// Create a registry with all built-in sources
pub fn default_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register("generator", GeneratorFactory);
    registry.register("tcp", TcpSourceFactory);
    registry
}

/// Write a batch through the gated writer, retrying until admitted or cancelled
///
/// With acknowledgements enabled the batch becomes one sealed set; if the
/// write ultimately fails every handle is released as failed.
pub(crate) async fn write_batch(
    context: &SourceContext,
    metrics: &Arc<SourceMetrics>,
    mut records: Vec<Record<Event>>,
    cancel: &CancellationToken,
) -> SourceResult<()> {
    let count = records.len();
    if count == 0 {
        return Ok(());
    }

    let mut handles = Vec::new();
    if let Some(manager) = &context.acknowledgements {
        let set_metrics = Arc::clone(metrics);
        let set = manager.create(move |success| set_metrics.set_completed(success));
        handles.reserve(count);
        for record in &mut records {
            let handle = EventHandle::new();
            set.add(&handle);
            record.data_mut().set_handle(handle.clone());
            handles.push(handle);
        }
        set.seal();
    }

    match context
        .writer
        .write_all_with_retry(records, context.write_timeout, context.backoff, cancel)
        .await
    {
        Ok(()) => {
            metrics.batch_written(count as u64);
            Ok(())
        }
        Err(e) => {
            metrics.write_error();
            for handle in &handles {
                handle.release(false);
            }
            Err(e.into())
        }
    }
}

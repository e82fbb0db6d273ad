//! Pipeline builder
//!
//! Assembles a [`Pipeline`] from parts, or from a [`Config`] through the
//! plugin registries.
//!
//! # Example
//!
//! ```ignore
//! let pipeline = PipelineBuilder::new("traces")
//!     .with_source(Box::new(source))
//!     .with_processor(Box::new(aggregate))
//!     .with_sink(Arc::new(FileSink::new(config)))
//!     .with_peer_forwarding(provider)
//!     .build()?;
//! pipeline.start().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use sluice_buffer::{BoundedBuffer, Buffer, BufferConfig, DEFAULT_CAPACITY};
use sluice_config::Config;
use sluice_peer::{PeerForwarder, PeerForwarderProvider};
use sluice_protocol::{AcknowledgementManager, Event};
use sluice_resilience::{CircuitBreaker, CompositeBreaker};
use sluice_sinks::{DeadLetterQueue, FileDeadLetterQueue, Sink, SinkRegistry};
use sluice_sources::{Source, SourceRegistry};
use sluice_transform::{Processor, ProcessorChain, ProcessorRegistry};
use tokio::sync::broadcast;

use crate::error::{PipelineError, Result};
use crate::metrics::{FailureTracker, PipelineMetrics};
use crate::pipeline::{Pipeline, Settings, Shared};
use crate::state::StateCell;

#[cfg(test)]
#[path = "builder_test.rs"]
mod tests;

pub const DEFAULT_BATCH_SIZE: usize = 125;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure reports kept for slow subscribers
const FAILURE_CHANNEL_CAPACITY: usize = 256;

/// Plugin registries used to build a pipeline from configuration
pub struct Plugins {
    pub sources: SourceRegistry,
    pub processors: ProcessorRegistry,
    pub sinks: SinkRegistry,
}

impl Plugins {
    /// Registries holding every built-in plugin
    pub fn builtin() -> Self {
        Self {
            sources: sluice_sources::default_registry(),
            processors: sluice_transform::default_registry(),
            sinks: sluice_sinks::default_registry(),
        }
    }
}

impl std::fmt::Debug for Plugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugins")
            .field("sources", &self.sources.available_types())
            .field("processors", &self.processors.available_types())
            .field("sinks", &self.sinks.available_types())
            .finish()
    }
}

impl Default for Plugins {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    name: String,
    workers: usize,
    batch_size: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    shutdown_grace: Duration,
    drain_timeout: Duration,
    acknowledgement_timeout: Option<Duration>,
    buffer: Option<Arc<dyn Buffer<Event>>>,
    breaker: Option<Arc<dyn CircuitBreaker>>,
    source: Option<Box<dyn Source>>,
    processors: Vec<Box<dyn Processor>>,
    sinks: Vec<Arc<dyn Sink>>,
    dead_letter: Option<Arc<dyn DeadLetterQueue>>,
    peer: Option<Arc<PeerForwarderProvider>>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            acknowledgement_timeout: None,
            buffer: None,
            breaker: None,
            source: None,
            processors: Vec::new(),
            sinks: Vec::new(),
            dead_letter: None,
            peer: None,
        }
    }

    /// Builder populated from configuration
    ///
    /// Creates the source, processors, sinks, buffer and dead-letter queue.
    /// Circuit breakers and peer forwarding are runtime wiring and are
    /// attached by the caller.
    pub fn from_config(config: &Config, plugins: &Plugins) -> Result<Self> {
        let settings = &config.pipeline;
        let mut builder = Self::new(&settings.name)
            .with_workers(settings.workers)
            .with_batch_size(settings.batch_size)
            .with_read_timeout(settings.read_timeout())
            .with_write_timeout(config.buffer.write_timeout())
            .with_shutdown_grace(settings.shutdown_grace())
            .with_drain_timeout(settings.drain_timeout());

        if settings.acknowledgements {
            builder = builder.with_acknowledgements(settings.acknowledgement_timeout());
        }

        let mut buffer_config = BufferConfig::new(config.buffer.capacity)
            .with_redelivery_timeout(config.buffer.redelivery_timeout());
        if let Some(max_bytes) = config.buffer.max_bytes {
            buffer_config = buffer_config.with_max_bytes(max_bytes);
        }
        let buffer = BoundedBuffer::new(buffer_name(&settings.name), buffer_config)
            .with_weigher(Event::estimated_size);
        builder = builder.with_buffer(Arc::new(buffer));

        let source = plugins
            .sources
            .create(&config.source)
            .map_err(|e| PipelineError::config(format!("source '{}': {e}", config.source.plugin_type)))?;
        builder = builder.with_source(source);

        for processor in config.enabled_processors() {
            builder = builder.with_processor(plugins.processors.create(processor)?);
        }
        for sink in config.enabled_sinks() {
            let sink = plugins.sinks.create(sink).map_err(PipelineError::Sink)?;
            builder = builder.with_sink(Arc::from(sink));
        }

        if let Some(dead_letter) = &config.dead_letter {
            builder = builder.with_dead_letter(Arc::new(FileDeadLetterQueue::new(&dead_letter.path)));
        }

        Ok(builder)
    }

    /// Number of worker tasks
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Maximum records per buffer read
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// How long a worker waits for data on each read
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Timeout for one source write attempt
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Time in-flight workers get on stop before they are aborted
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Time allowed to drain buffered records on stop
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Track acknowledgements, expiring sets after `timeout`
    #[must_use]
    pub fn with_acknowledgements(mut self, timeout: Duration) -> Self {
        self.acknowledgement_timeout = Some(timeout);
        self
    }

    /// Use this buffer instead of a default bounded buffer
    #[must_use]
    pub fn with_buffer(mut self, buffer: Arc<dyn Buffer<Event>>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Gate source writes on this breaker
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: Box<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }

    /// Append a processor to the chain
    #[must_use]
    pub fn with_processor(mut self, processor: Box<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Route records tagged as failed to this queue instead of the sinks
    #[must_use]
    pub fn with_dead_letter(mut self, queue: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    /// Route stateful stages through the peer forwarder
    #[must_use]
    pub fn with_peer_forwarding(mut self, provider: Arc<PeerForwarderProvider>) -> Self {
        self.peer = Some(provider);
        self
    }

    /// Validate and assemble the pipeline
    ///
    /// # Errors
    ///
    /// `Config` when the source or every sink is missing, or a size
    /// setting is zero or larger than the buffer.
    pub fn build(self) -> Result<Pipeline> {
        let Some(source) = self.source else {
            return Err(PipelineError::config(format!(
                "pipeline '{}' has no source",
                self.name
            )));
        };
        if self.sinks.is_empty() {
            return Err(PipelineError::config(format!(
                "pipeline '{}' has no sinks",
                self.name
            )));
        }
        if self.workers == 0 {
            return Err(PipelineError::config("workers must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::config("batch_size must be greater than 0"));
        }

        let buffer = self.buffer.unwrap_or_else(|| {
            Arc::new(BoundedBuffer::new(
                buffer_name(&self.name),
                BufferConfig::new(DEFAULT_CAPACITY),
            ))
        });
        if self.batch_size > buffer.capacity() {
            return Err(PipelineError::config(format!(
                "batch_size {} exceeds buffer capacity {}",
                self.batch_size,
                buffer.capacity()
            )));
        }
        let breaker = self
            .breaker
            .unwrap_or_else(|| Arc::new(CompositeBreaker::new()));

        let chain = ProcessorChain::new(self.processors);
        let forwarders = register_forwarders(&self.name, &chain, self.peer.as_deref(), self.workers);

        tracing::debug!(
            pipeline = %self.name,
            buffer = buffer.name(),
            breaker = breaker.name(),
            processors = ?chain.names(),
            "pipeline built"
        );

        Ok(Pipeline::new(Shared {
            name: self.name,
            settings: Settings {
                workers: self.workers,
                batch_size: self.batch_size,
                read_timeout: self.read_timeout,
                write_timeout: self.write_timeout,
                shutdown_grace: self.shutdown_grace,
                drain_timeout: self.drain_timeout,
            },
            state: StateCell::new(),
            buffer,
            breaker,
            source,
            chain,
            forwarders,
            sinks: self.sinks,
            dead_letter: self.dead_letter,
            acknowledgements: self.acknowledgement_timeout.map(AcknowledgementManager::new),
            metrics: PipelineMetrics::new(),
            failures: broadcast::channel(FAILURE_CHANNEL_CAPACITY).0,
            failure_log: FailureTracker::new(),
        }))
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("batch_size", &self.batch_size)
            .field("source", &self.source.as_ref().map(|s| s.name().to_string()))
            .field("processors", &self.processors.len())
            .field("sinks", &self.sinks.len())
            .field("peer_forwarding", &self.peer.is_some())
            .finish()
    }
}

fn buffer_name(pipeline: &str) -> String {
    format!("{pipeline}/buffer")
}

/// Forwarder per stage for processors that declare identification keys
///
/// Without a provider every stage runs locally on all keys, which is
/// correct for a single node.
fn register_forwarders(
    pipeline: &str,
    chain: &ProcessorChain,
    provider: Option<&PeerForwarderProvider>,
    workers: usize,
) -> Vec<Option<Arc<PeerForwarder>>> {
    let mut forwarders = vec![None; chain.len()];
    let stages = chain.forwarding_stages();

    let Some(provider) = provider else {
        if !stages.is_empty() {
            tracing::debug!(
                pipeline,
                stages = ?stages,
                "no peer forwarding configured, stateful stages see all keys locally"
            );
        }
        return forwarders;
    };

    for index in stages {
        let Some(processor) = chain.processor(index) else {
            continue;
        };
        let keys = chain.identification_keys(index).unwrap_or_default().to_vec();
        let plugin_id = format!("{index}-{}", processor.name());
        forwarders[index] = Some(provider.register(pipeline, &plugin_id, keys, workers));
    }
    forwarders
}

//! Noop Processor - Pass-through processor
//!
//! Passes batches through unchanged. Useful for testing the chain and for
//! measuring engine overhead.

use crate::registry::ProcessorFactory;
use crate::{Processor, ProcessorFuture, ProcessorResult};
use sluice_config::PluginConfig;
use sluice_protocol::{Event, Record};


/// A processor that passes batches through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProcessor;

impl NoopProcessor {
    /// Create a new noop processor
    #[inline]
    pub const fn new() -> Self {
        Self
    }
}

impl Processor for NoopProcessor {
    fn execute<'a>(&'a self, records: Vec<Record<Event>>) -> ProcessorFuture<'a> {
        Box::pin(async move { Ok(records) })
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Factory for NoopProcessor
#[derive(Debug, Clone, Copy)]
pub struct NoopFactory;

impl ProcessorFactory for NoopFactory {
    fn create(&self, _config: &PluginConfig) -> ProcessorResult<Box<dyn Processor>> {
        Ok(Box::new(NoopProcessor::new()))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

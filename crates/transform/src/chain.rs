//! Processor Chain - Sequential batch processing
//!
//! The `ProcessorChain` applies processors in declared order to batches
//! drained from the buffer.
//!
//! # Design
//!
//! - **Sequential execution**: each processor receives the output of the
//!   previous one
//! - **Fail-fast**: the first error stops the chain and fails the batch
//! - **Stage access**: the engine runs stages one at a time when it has to
//!   route records through the peer forwarder between two processors
//! - **Exclusive stages**: a processor that requires exclusive access is
//!   gated so that at most one worker executes it at a time

use crate::{Processor, ProcessorResult};
use sluice_protocol::{Event, KeyPath, Record};
use tokio::sync::Mutex;

#[cfg(test)]
#[path = "chain_test.rs"]
mod tests;

struct Stage {
    processor: Box<dyn Processor>,
    gate: Option<Mutex<()>>,
}

/// Ordered list of processors
pub struct ProcessorChain {
    stages: Vec<Stage>,
}

impl ProcessorChain {
    /// Create a new chain
    ///
    /// Only enabled processors are included.
    pub fn new(processors: Vec<Box<dyn Processor>>) -> Self {
        let stages = processors
            .into_iter()
            .filter(|p| p.enabled())
            .map(|processor| {
                let gate = processor.requires_exclusive().then(|| Mutex::new(()));
                Stage { processor, gate }
            })
            .collect();

        Self { stages }
    }

    /// Create an empty chain (pass-through)
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// Number of active processors
    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no processors
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of all active processors, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.processor.name()).collect()
    }

    /// Processor at a stage index
    pub fn processor(&self, index: usize) -> Option<&dyn Processor> {
        self.stages.get(index).map(|s| s.processor.as_ref())
    }

    /// First processor with the given name
    pub fn get(&self, name: &str) -> Option<&dyn Processor> {
        self.stages
            .iter()
            .find(|s| s.processor.name() == name)
            .map(|s| s.processor.as_ref())
    }

    /// Identification keys of the processor at `index`, if it requires forwarding
    pub fn identification_keys(&self, index: usize) -> Option<&[KeyPath]> {
        self.stages
            .get(index)
            .and_then(|s| s.processor.identification_keys())
    }

    /// Indices of stages whose processor requires peer forwarding
    pub fn forwarding_stages(&self) -> Vec<usize> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.processor.identification_keys().is_some())
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether any processor requires peer forwarding
    pub fn requires_forwarding(&self) -> bool {
        self.stages
            .iter()
            .any(|s| s.processor.identification_keys().is_some())
    }

    /// Run a single stage
    ///
    /// Indices past the end pass the batch through unchanged.
    pub async fn execute_stage(
        &self,
        index: usize,
        records: Vec<Record<Event>>,
    ) -> ProcessorResult<Vec<Record<Event>>> {
        let Some(stage) = self.stages.get(index) else {
            return Ok(records);
        };

        match &stage.gate {
            Some(gate) => {
                let _guard = gate.lock().await;
                stage.processor.execute(records).await
            }
            None => stage.processor.execute(records).await,
        }
    }

    /// Run every stage in order
    pub async fn execute(&self, records: Vec<Record<Event>>) -> ProcessorResult<Vec<Record<Event>>> {
        let mut current = records;
        for index in 0..self.stages.len() {
            current = self.execute_stage(index, current).await?;
        }
        Ok(current)
    }

    /// Ask every processor to start flushing held state
    pub fn prepare_for_shutdown(&self) {
        for stage in &self.stages {
            stage.processor.prepare_for_shutdown();
        }
    }

    /// Whether every processor has emitted its held state
    pub fn is_ready_for_shutdown(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.processor.is_ready_for_shutdown())
    }

    /// Shut down every processor, logging failures
    pub fn shutdown(&self) {
        for stage in &self.stages {
            if let Err(e) = stage.processor.shutdown() {
                tracing::warn!(processor = stage.processor.name(), error = %e, "processor shutdown failed");
            }
        }
    }
}

impl Default for ProcessorChain {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.names())
            .finish()
    }
}

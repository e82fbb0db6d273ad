//! Receive buffers
//!
//! Records forwarded from peers, and records whose forwarding failed and
//! fell back to this node, wait in a receive buffer owned by one
//! (pipeline, processor) pair. The pipeline drains it without blocking right
//! before the processor stage and commits its window together with the main
//! buffer's window.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sluice_buffer::{
    BoundedBuffer, Buffer, BufferConfig, BufferError, CheckpointState, GatedWriter,
    Result as BufferResult,
};
use sluice_protocol::{Event, Record};
use sluice_resilience::CircuitBreaker;

/// A chunked write that stopped early
///
/// The first `written` records are in the buffer; `remaining` were not
/// written and still belong to the caller.
#[derive(Debug)]
pub struct PartialWrite {
    pub written: usize,
    pub remaining: Vec<Record<Event>>,
    pub error: BufferError,
}

/// Buffer for one (pipeline, processor) pair plus its breaker-gated writer
#[derive(Clone)]
pub struct ReceiveBuffer {
    buffer: Arc<BoundedBuffer<Event>>,
    writer: GatedWriter<Event>,
}

impl ReceiveBuffer {
    /// Create a receive buffer of `capacity` records
    pub fn new(
        pipeline: &str,
        plugin_id: &str,
        capacity: usize,
        breaker: Arc<dyn CircuitBreaker>,
    ) -> Self {
        let buffer = Arc::new(BoundedBuffer::new(
            format!("{pipeline}/{plugin_id}/receive"),
            BufferConfig::new(capacity),
        ));
        let writer = GatedWriter::new(buffer.clone(), breaker);
        Self { buffer, writer }
    }

    pub fn buffer(&self) -> &Arc<BoundedBuffer<Event>> {
        &self.buffer
    }

    /// Breaker-gated write path
    pub fn writer(&self) -> &GatedWriter<Event> {
        &self.writer
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Write `records` through the gate in chunks of at most `capacity()`
    ///
    /// Each chunk is all-or-nothing and gets its own `timeout`. Stops at the
    /// first chunk that fails and hands back everything not yet written.
    pub async fn write_chunked(
        &self,
        mut records: Vec<Record<Event>>,
        timeout: Duration,
    ) -> Result<usize, PartialWrite> {
        let chunk_size = self.capacity().max(1);
        let mut written = 0;
        while !records.is_empty() {
            let rest = records.split_off(chunk_size.min(records.len()));
            let chunk = std::mem::replace(&mut records, rest);
            let len = chunk.len();
            if let Err(error) = self.writer.write_all(chunk.clone(), timeout).await {
                let mut remaining = chunk;
                remaining.append(&mut records);
                return Err(PartialWrite {
                    written,
                    remaining,
                    error,
                });
            }
            written += len;
        }
        Ok(written)
    }

    /// Take whatever is available, up to `max`, without waiting
    pub async fn drain(&self, max: usize) -> BufferResult<(Vec<Record<Event>>, CheckpointState)> {
        self.buffer.read(max, Duration::ZERO).await
    }

    pub fn checkpoint(&self, state: &CheckpointState) -> BufferResult<()> {
        self.buffer.checkpoint(state)
    }

    /// Records held, including drained but uncommitted ones
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl std::fmt::Debug for ReceiveBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveBuffer")
            .field("name", &self.buffer.name())
            .field("len", &self.buffer.len())
            .finish()
    }
}

/// Receive buffers keyed by (pipeline, processor)
///
/// Shared between the forwarders that fill them on fallback, the RPC
/// server that fills them from peers, and the pipelines that drain them.
#[derive(Debug, Clone, Default)]
pub struct ReceiveBuffers {
    inner: Arc<DashMap<(String, String), ReceiveBuffer>>,
}

impl ReceiveBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer, replacing any previous one for the pair
    pub fn register(&self, pipeline: &str, plugin_id: &str, buffer: ReceiveBuffer) {
        self.inner
            .insert((pipeline.to_string(), plugin_id.to_string()), buffer);
    }

    /// Buffer for a pair, if registered
    pub fn get(&self, pipeline: &str, plugin_id: &str) -> Option<ReceiveBuffer> {
        self.inner
            .get(&(pipeline.to_string(), plugin_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

//! Buffer contract and checkpoint tokens

use std::time::Duration;

use async_trait::async_trait;
use sluice_protocol::Record;

use crate::error::Result;

/// Token describing one read window
///
/// Returned by every [`Buffer::read`] and passed back unchanged to
/// [`Buffer::checkpoint`]. A state is valid for exactly one buffer and one
/// outstanding window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointState {
    buffer_id: u64,
    window_id: u64,
    count: usize,
}

impl CheckpointState {
    pub(crate) const fn new(buffer_id: u64, window_id: u64, count: usize) -> Self {
        Self {
            buffer_id,
            window_id,
            count,
        }
    }

    /// State for a read that delivered nothing
    pub(crate) const fn empty(buffer_id: u64) -> Self {
        Self::new(buffer_id, 0, 0)
    }

    /// Number of records the read delivered
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the read delivered nothing
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Window identifier, unique per buffer
    #[inline]
    pub fn window_id(&self) -> u64 {
        self.window_id
    }

    /// Identifier of the buffer that issued this state
    #[inline]
    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }
}

/// Bounded, concurrent queue of records with read-window checkpointing
///
/// Records stay in the buffer from `write` until the window that delivered
/// them is checkpointed. A window that is not checkpointed before the
/// buffer's redelivery deadline returns to the available pool.
#[async_trait]
pub trait Buffer<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Buffer name for logging
    fn name(&self) -> &str;

    /// Enqueue one record, waiting up to `timeout` for space
    async fn write(&self, record: Record<T>, timeout: Duration) -> Result<()>;

    /// Enqueue every record or none, waiting up to `timeout` for space
    async fn write_all(&self, records: Vec<Record<T>>, timeout: Duration) -> Result<()>;

    /// Take up to `batch_size` records, waiting up to `timeout` for at least one
    ///
    /// On timeout with no data the result is empty with a zero-count state.
    async fn read(
        &self,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<(Vec<Record<T>>, CheckpointState)>;

    /// Commit a read window, removing its records permanently
    fn checkpoint(&self, state: &CheckpointState) -> Result<()>;

    /// Records held: available plus read but not yet checkpointed
    fn len(&self) -> usize;

    /// Whether the buffer holds no records at all
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of records held
    fn capacity(&self) -> usize;

    /// Stop accepting writes and wake blocked callers
    ///
    /// Records already held can still be read and checkpointed.
    fn shutdown(&self);

    /// Whether [`shutdown`](Self::shutdown) has been called
    fn is_shut_down(&self) -> bool;
}

//! Bounded in-memory buffer
//!
//! # Windows
//!
//! ```text
//!   write ──► available ──read──► in_flight[window] ──checkpoint──► (gone)
//!                 ▲                      │
//!                 └──── deadline passed ─┘  (redelivery, to the front)
//! ```
//!
//! Occupancy counts available plus in-flight records, so a window that is
//! read but not checkpointed keeps holding its capacity. Expired windows are
//! reclaimed lazily by the next `read`; until then they can still be
//! checkpointed.
//!
//! Contents are lost if the process dies. Redelivery only protects against a
//! worker that stops making progress.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_protocol::Record;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::buffer::{Buffer, CheckpointState};
use crate::error::{BufferError, Result};
use crate::metrics::BufferMetrics;

#[cfg(test)]
#[path = "bounded_test.rs"]
mod tests;

/// Default capacity in records
pub const DEFAULT_CAPACITY: usize = 12_800;

/// Default time a read window may stay uncommitted before redelivery
pub const DEFAULT_REDELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Computes the byte weight of a payload for byte-bounded buffers
pub type Weigher<T> = Arc<dyn Fn(&T) -> usize + Send + Sync>;

/// Buffer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Maximum records held (available plus in flight)
    pub capacity: usize,

    /// Optional cap on the summed record weight
    pub max_bytes: Option<usize>,

    /// How long a read window may stay uncommitted
    pub redelivery_timeout: Duration,
}

impl BufferConfig {
    /// Config with the given capacity and default redelivery timeout
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            max_bytes: None,
            redelivery_timeout: DEFAULT_REDELIVERY_TIMEOUT,
        }
    }

    /// Cap the summed record weight
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Set the redelivery timeout
    #[must_use]
    pub fn with_redelivery_timeout(mut self, timeout: Duration) -> Self {
        self.redelivery_timeout = timeout;
        self
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

struct Entry<T> {
    record: Record<T>,
    bytes: usize,
}

struct Window<T> {
    entries: Vec<Entry<T>>,
    deadline: Instant,
}

struct State<T> {
    available: VecDeque<Entry<T>>,
    in_flight: HashMap<u64, Window<T>>,
    occupied: usize,
    occupied_bytes: usize,
    next_window: u64,
    shut_down: bool,
}

impl<T> State<T> {
    fn new() -> Self {
        Self {
            available: VecDeque::new(),
            in_flight: HashMap::new(),
            occupied: 0,
            occupied_bytes: 0,
            next_window: 1,
            shut_down: false,
        }
    }

    /// Return expired windows to the front of the available pool, oldest first
    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let mut expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, window)| window.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        if expired.is_empty() {
            return 0;
        }
        expired.sort_unstable();

        let mut count = 0;
        for id in expired.into_iter().rev() {
            if let Some(window) = self.in_flight.remove(&id) {
                count += window.entries.len();
                for entry in window.entries.into_iter().rev() {
                    self.available.push_front(entry);
                }
            }
        }
        count
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|w| w.deadline).min()
    }
}

/// Bounded, checkpoint-aware in-memory buffer
///
/// Safe for any number of concurrent writers and readers. Records delivered
/// by one read belong to exactly one window until that window is committed
/// or redelivered.
pub struct BoundedBuffer<T> {
    id: u64,
    name: String,
    config: BufferConfig,
    weigher: Option<Weigher<T>>,
    state: Mutex<State<T>>,
    space: Notify,
    data: Notify,
    metrics: Arc<BufferMetrics>,
}

impl<T> BoundedBuffer<T>
where
    T: Clone + Send + 'static,
{
    /// Create a buffer
    pub fn new(name: impl Into<String>, config: BufferConfig) -> Self {
        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            config,
            weigher: None,
            state: Mutex::new(State::new()),
            space: Notify::new(),
            data: Notify::new(),
            metrics: Arc::new(BufferMetrics::new()),
        }
    }

    /// Weigh payloads for the `max_bytes` bound
    #[must_use]
    pub fn with_weigher(mut self, weigher: impl Fn(&T) -> usize + Send + Sync + 'static) -> Self {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Unique buffer identifier
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Buffer configuration
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Buffer counters
    pub fn metrics(&self) -> &BufferMetrics {
        &self.metrics
    }

    /// Shared handle to the buffer counters
    pub fn metrics_handle(&self) -> Arc<BufferMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Records ready to be read
    pub fn available(&self) -> usize {
        self.state.lock().available.len()
    }

    /// Records read but not yet checkpointed
    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .in_flight
            .values()
            .map(|w| w.entries.len())
            .sum()
    }

    /// Summed weight of held records
    pub fn occupied_bytes(&self) -> usize {
        self.state.lock().occupied_bytes
    }

    fn weigh(&self, record: &Record<T>) -> usize {
        self.weigher.as_ref().map_or(0, |w| w(record.data()))
    }

    fn validate_write(&self, count: usize, bytes: usize) -> Result<()> {
        if self.config.capacity == 0 {
            return Err(BufferError::write(format!(
                "buffer '{}' has zero capacity",
                self.name
            )));
        }
        if count > self.config.capacity {
            return Err(BufferError::write(format!(
                "{count} records exceed capacity {} of buffer '{}'",
                self.config.capacity, self.name
            )));
        }
        if let Some(max) = self.config.max_bytes
            && bytes > max
        {
            return Err(BufferError::write(format!(
                "{bytes} bytes exceed max_bytes {max} of buffer '{}'",
                self.name
            )));
        }
        Ok(())
    }

    /// Move `entries` into the buffer if they all fit
    fn try_admit(&self, entries: &mut Vec<Entry<T>>, bytes: usize) -> Result<bool> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(BufferError::ShutDown);
        }

        let fits_count = state.occupied + entries.len() <= self.config.capacity;
        let fits_bytes = self
            .config
            .max_bytes
            .is_none_or(|max| state.occupied_bytes + bytes <= max);
        if !(fits_count && fits_bytes) {
            return Ok(false);
        }

        state.occupied += entries.len();
        state.occupied_bytes += bytes;
        state.available.extend(entries.drain(..));
        Ok(true)
    }
}

#[async_trait]
impl<T> Buffer<T> for BoundedBuffer<T>
where
    T: Clone + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: Record<T>, timeout: Duration) -> Result<()> {
        self.write_all(vec![record], timeout).await
    }

    async fn write_all(&self, records: Vec<Record<T>>, timeout: Duration) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut entries: Vec<Entry<T>> = records
            .into_iter()
            .map(|record| {
                let bytes = self.weigh(&record);
                Entry { record, bytes }
            })
            .collect();
        let count = entries.len();
        let bytes: usize = entries.iter().map(|e| e.bytes).sum();
        self.validate_write(count, bytes)?;

        let deadline = deadline_after(timeout);
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_admit(&mut entries, bytes)? {
                self.metrics.record_written(count);
                self.data.notify_waiters();
                return Ok(());
            }

            if Instant::now() >= deadline {
                self.metrics.record_write_timeout();
                return Err(BufferError::full(&self.name, self.config.capacity));
            }

            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    async fn read(
        &self,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<(Vec<Record<T>>, CheckpointState)> {
        let deadline = deadline_after(timeout);
        loop {
            let notified = self.data.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake = {
                let mut state = self.state.lock();
                let now = Instant::now();

                let redelivered = state.reclaim_expired(now);
                if redelivered > 0 {
                    self.metrics.record_redelivered(redelivered);
                    tracing::debug!(
                        buffer = %self.name,
                        records = redelivered,
                        "uncommitted windows expired, records redelivered"
                    );
                }

                if batch_size > 0 && !state.available.is_empty() {
                    let take = batch_size.min(state.available.len());
                    let entries: Vec<Entry<T>> = state.available.drain(..take).collect();
                    let records = entries.iter().map(|e| e.record.clone()).collect();

                    let window_id = state.next_window;
                    state.next_window += 1;
                    state.in_flight.insert(
                        window_id,
                        Window {
                            entries,
                            deadline: instant_after(now, self.config.redelivery_timeout),
                        },
                    );
                    drop(state);

                    self.metrics.record_read(take);
                    return Ok((records, CheckpointState::new(self.id, window_id, take)));
                }

                if batch_size == 0 || state.shut_down || now >= deadline {
                    return Ok((Vec::new(), CheckpointState::empty(self.id)));
                }

                state
                    .next_deadline()
                    .map_or(deadline, |next| next.min(deadline))
            };

            let _ = tokio::time::timeout_at(wake, notified).await;
        }
    }

    fn checkpoint(&self, checkpoint: &CheckpointState) -> Result<()> {
        if checkpoint.buffer_id() != self.id {
            self.metrics.record_invalid_checkpoint();
            return Err(BufferError::invalid_checkpoint(format!(
                "window {} was issued by another buffer",
                checkpoint.window_id()
            )));
        }
        if checkpoint.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let outstanding = state
            .in_flight
            .get(&checkpoint.window_id())
            .map(|window| window.entries.len());
        let Some(count) = outstanding else {
            drop(state);
            self.metrics.record_invalid_checkpoint();
            return Err(BufferError::invalid_checkpoint(format!(
                "window {} is not outstanding in buffer '{}'",
                checkpoint.window_id(),
                self.name
            )));
        };
        if count != checkpoint.count() {
            drop(state);
            self.metrics.record_invalid_checkpoint();
            return Err(BufferError::invalid_checkpoint(format!(
                "window {} holds {count} records, checkpoint claims {}",
                checkpoint.window_id(),
                checkpoint.count()
            )));
        }

        let bytes: usize = state
            .in_flight
            .remove(&checkpoint.window_id())
            .map_or(0, |window| window.entries.iter().map(|e| e.bytes).sum());
        state.occupied = state.occupied.saturating_sub(count);
        state.occupied_bytes = state.occupied_bytes.saturating_sub(bytes);
        drop(state);

        self.metrics.record_checkpointed(count);
        self.space.notify_waiters();
        Ok(())
    }

    fn len(&self) -> usize {
        self.state.lock().occupied
    }

    fn capacity(&self) -> usize {
        self.config.capacity
    }

    fn shutdown(&self) {
        let remaining = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.occupied
        };
        tracing::debug!(buffer = %self.name, remaining, "buffer shut down");
        self.space.notify_waiters();
        self.data.notify_waiters();
    }

    fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl<T> fmt::Debug for BoundedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedBuffer")
            .field("name", &self.name)
            .field("capacity", &self.config.capacity)
            .field("occupied", &state.occupied)
            .field("windows", &state.in_flight.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

/// Deadline `timeout` from now, saturating far in the future
fn deadline_after(timeout: Duration) -> Instant {
    instant_after(Instant::now(), timeout)
}

fn instant_after(base: Instant, timeout: Duration) -> Instant {
    base.checked_add(timeout)
        .unwrap_or_else(|| base + Duration::from_secs(86_400 * 365))
}

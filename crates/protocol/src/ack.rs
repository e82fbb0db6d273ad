//! End-to-end acknowledgement tracking
//!
//! A source that needs to know when its data has been fully handled (for
//! example to acknowledge a message broker) groups the events it emits into
//! an [`AcknowledgementSet`]. Every event added to the set carries an
//! [`EventHandle`]; the set completes once every handle registered with it
//! has been released and the source has sealed the set.
//!
//! ```text
//! source ── create set ──► add(event) × N ──► seal()
//!                                │
//!           processors derive()  ▼  (fan-out: +1 pending per child)
//!           sinks succeed ──► release(true)  (-1 pending)
//!                                │
//!                     pending == 0 && sealed ──► callback(success)
//! ```
//!
//! Fan-out is tracked by [`EventHandle::derive`], which registers a new
//! handle with every set the parent belongs to. Fan-in is tracked by
//! [`EventHandle::merge`], which makes one handle responsible for the sets
//! of another. Releasing a handle is idempotent.
//!
//! Sets that do not complete within their timeout are expired by the
//! [`AcknowledgementManager`] sweeper and complete with `false`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "ack_test.rs"]
mod tests;

/// Completion callback, invoked once with the overall outcome
pub type AckCallback = Box<dyn FnOnce(bool) + Send + 'static>;

struct SetInner {
    id: u64,
    pending: AtomicUsize,
    failed: AtomicBool,
    sealed: AtomicBool,
    completed: AtomicBool,
    expires_at: Instant,
    callback: Mutex<Option<AckCallback>>,
}

impl SetInner {
    fn fire(&self, success: bool) -> bool {
        if self.completed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(callback) = self.callback.lock().take() {
            callback(success);
        }
        true
    }

    fn release_one(&self, success: bool) {
        if !success {
            self.failed.store(true, Ordering::SeqCst);
        }
        let previous = self.pending.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.sealed.load(Ordering::SeqCst) {
            self.fire(!self.failed.load(Ordering::SeqCst));
        }
    }
}

/// A group of events whose collective outcome is reported to a callback
#[derive(Clone)]
pub struct AcknowledgementSet {
    inner: Arc<SetInner>,
}

impl AcknowledgementSet {
    /// Create a standalone set that expires after `timeout`
    ///
    /// Sets created this way are not swept; use
    /// [`AcknowledgementManager::create`] for sets that must expire.
    pub fn new(id: u64, timeout: Duration, callback: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(SetInner {
                id,
                pending: AtomicUsize::new(0),
                failed: AtomicBool::new(false),
                sealed: AtomicBool::new(false),
                completed: AtomicBool::new(false),
                expires_at: Instant::now() + timeout,
                callback: Mutex::new(Some(Box::new(callback))),
            }),
        }
    }

    /// Set identifier
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Register a handle with this set
    ///
    /// Adding to a set that has already completed has no effect.
    pub fn add(&self, handle: &EventHandle) {
        let mut sets = handle.inner.sets.lock();
        if self.is_completed() || handle.is_released() {
            return;
        }
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        sets.push(Arc::clone(&self.inner));
    }

    /// Declare that no more events will be added
    ///
    /// If every added handle was already released the callback fires now.
    pub fn seal(&self) {
        self.inner.sealed.store(true, Ordering::SeqCst);
        if self.inner.pending.load(Ordering::SeqCst) == 0 {
            self.inner.fire(!self.inner.failed.load(Ordering::SeqCst));
        }
    }

    /// Complete the set with `false` if its deadline has passed
    ///
    /// Returns true if this call expired the set.
    pub fn expire_if_due(&self, now: Instant) -> bool {
        if now < self.inner.expires_at {
            return false;
        }
        let fired = self.inner.fire(false);
        if fired {
            tracing::debug!(set_id = self.inner.id, "acknowledgement set expired");
        }
        fired
    }

    /// Number of handles not yet released
    #[inline]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Whether the callback has fired (by completion or expiry)
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Whether the set has been sealed
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for AcknowledgementSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcknowledgementSet")
            .field("id", &self.inner.id)
            .field("pending", &self.pending())
            .field("sealed", &self.is_sealed())
            .field("completed", &self.is_completed())
            .finish()
    }
}

struct HandleInner {
    released: AtomicBool,
    sets: Mutex<Vec<Arc<SetInner>>>,
}

/// Per-event acknowledgement handle
///
/// Clones share release state: releasing any clone releases the handle.
/// Use [`derive`](Self::derive) to obtain an independently tracked handle
/// for a record split off from this one.
#[derive(Clone)]
pub struct EventHandle {
    inner: Arc<HandleInner>,
}

impl EventHandle {
    /// Create a handle that belongs to no set
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                released: AtomicBool::new(false),
                sets: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Report the terminal outcome for this handle
    ///
    /// Only the first call has an effect.
    pub fn release(&self, success: bool) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let sets = std::mem::take(&mut *self.inner.sets.lock());
        for set in sets {
            set.release_one(success);
        }
    }

    /// Whether the handle has been released
    #[inline]
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Number of sets this handle reports to
    pub fn set_count(&self) -> usize {
        self.inner.sets.lock().len()
    }

    /// Create a handle for a record derived from this one
    ///
    /// The new handle is registered with every set this handle belongs to,
    /// so each set waits for the derived record as well.
    pub fn derive(&self) -> EventHandle {
        let derived = EventHandle::new();
        let ours = self.inner.sets.lock();
        if self.is_released() {
            return derived;
        }
        for set in ours.iter() {
            set.pending.fetch_add(1, Ordering::SeqCst);
        }
        *derived.inner.sets.lock() = ours.clone();
        derived
    }

    /// Make this handle also responsible for the sets of `other`
    ///
    /// Used when several records are combined into one. `other` still has to
    /// be released on its own.
    pub fn merge(&self, other: &EventHandle) {
        if self.is_released() || other.is_released() || Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        let theirs = other.inner.sets.lock().clone();
        let mut ours = self.inner.sets.lock();
        for set in theirs {
            if ours.iter().any(|s| Arc::ptr_eq(s, &set)) {
                continue;
            }
            set.pending.fetch_add(1, Ordering::SeqCst);
            ours.push(set);
        }
    }
}

impl Default for EventHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("released", &self.is_released())
            .field("sets", &self.set_count())
            .finish()
    }
}

/// Counters for acknowledgement outcomes
#[derive(Debug, Default)]
pub struct AcknowledgementMetrics {
    created: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
}

impl AcknowledgementMetrics {
    /// Sets created
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Sets completed successfully
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Sets completed with a failure (including expiry)
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Sets expired by the sweeper
    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }
}

struct ManagerInner {
    next_id: AtomicU64,
    timeout: Duration,
    sets: Mutex<HashMap<u64, AcknowledgementSet>>,
    metrics: Arc<AcknowledgementMetrics>,
}

/// Creates acknowledgement sets and expires those that time out
#[derive(Clone)]
pub struct AcknowledgementManager {
    inner: Arc<ManagerInner>,
}

impl AcknowledgementManager {
    /// Create a manager whose sets expire after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                next_id: AtomicU64::new(1),
                timeout,
                sets: Mutex::new(HashMap::new()),
                metrics: Arc::new(AcknowledgementMetrics::default()),
            }),
        }
    }

    /// Default expiry applied to new sets
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Create a tracked set with the manager's timeout
    pub fn create(&self, callback: impl FnOnce(bool) + Send + 'static) -> AcknowledgementSet {
        self.create_with_timeout(self.inner.timeout, callback)
    }

    /// Create a tracked set with an explicit timeout
    pub fn create_with_timeout(
        &self,
        timeout: Duration,
        callback: impl FnOnce(bool) + Send + 'static,
    ) -> AcknowledgementSet {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let metrics = Arc::clone(&self.inner.metrics);
        let set = AcknowledgementSet::new(id, timeout, move |success| {
            if success {
                metrics.succeeded.fetch_add(1, Ordering::Relaxed);
            } else {
                metrics.failed.fetch_add(1, Ordering::Relaxed);
            }
            callback(success);
        });
        self.inner.metrics.created.fetch_add(1, Ordering::Relaxed);
        self.inner.sets.lock().insert(id, set.clone());
        set
    }

    /// Expire overdue sets and forget completed ones
    ///
    /// Returns the number of sets expired by this call.
    pub fn sweep(&self, now: Instant) -> usize {
        // Callbacks run outside the lock; they may create new sets.
        let due: Vec<AcknowledgementSet> = self
            .inner
            .sets
            .lock()
            .values()
            .filter(|set| now >= set.inner.expires_at)
            .cloned()
            .collect();

        let expired = due.iter().filter(|set| set.expire_if_due(now)).count();
        self.inner.sets.lock().retain(|_, set| !set.is_completed());

        if expired > 0 {
            self.inner
                .metrics
                .expired
                .fetch_add(expired as u64, Ordering::Relaxed);
            tracing::warn!(expired, "acknowledgement sets expired before completion");
        }
        expired
    }

    /// Number of sets still outstanding
    pub fn outstanding(&self) -> usize {
        self.inner.sets.lock().len()
    }

    /// Outcome counters
    pub fn metrics(&self) -> &AcknowledgementMetrics {
        &self.inner.metrics
    }

    /// Spawn a task that sweeps on `interval` until cancelled
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep(Instant::now());
                    }
                }
            }
        })
    }
}

impl fmt::Debug for AcknowledgementManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcknowledgementManager")
            .field("timeout", &self.inner.timeout)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

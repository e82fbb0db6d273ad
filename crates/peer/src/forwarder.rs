//! Peer Forwarder - Key-based routing of records across the fleet
//!
//! Placed in front of a processor that declares identification keys. Every
//! record is hashed on those keys and looked up on the current ring:
//!
//! ```text
//! route(batch) ─┬─ owner == local ──────────────► returned for local processing
//!               ├─ no identification keys ──────► returned (counted)
//!               └─ owner == peer ──► [queue per peer] ──► batch ──► PeerClient
//!                                        │ full                        │ retries exhausted
//!                                        ▼                             ▼
//!                                  returned locally          receive buffer or dead letter
//! ```
//!
//! # Design
//!
//! - **Bounded queues**: one crossfire channel per destination, sized
//!   `batch_size × workers × queue_depth`. `route` waits up to the enqueue
//!   timeout for space, then keeps the records local instead of dropping them
//! - **Batching**: a destination task flushes when `batch_size` records are
//!   queued or `batch_timeout` has passed since its last flush
//! - **Retry**: failed requests are retried with capped exponential backoff.
//!   A peer that accepts only a prefix of a batch is sent the rest. On
//!   exhaustion the batch goes to the local receive buffer, in chunks no
//!   larger than its capacity, or to the dead-letter queue, per `on_exhausted`
//! - **Acknowledgements**: a record accepted by a peer, or dead-lettered, is
//!   a terminal outcome for its local handle. Records that fall back to the
//!   receive buffer keep their handle and finish through the local pipeline

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossfire::{AsyncRx, MAsyncTx, TrySendError};
use dashmap::DashMap;
use sluice_config::{ExhaustedPolicy, PeerForwarderConfig};
use sluice_protocol::{Event, ForwardRequest, KeyPath, Record, WireEvent};
use sluice_resilience::{Backoff, RetryPolicy};
use sluice_sinks::{DeadLetterEntry, DeadLetterQueue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::PeerClient;
use crate::error::PeerError;
use crate::membership::Membership;
use crate::metrics::{ForwarderMetrics, ForwarderMetricsSnapshot};
use crate::partition::PartitionKey;
use crate::ring::HashRing;
use crate::receive::ReceiveBuffer;

#[cfg(test)]
#[path = "forwarder_test.rs"]
mod tests;

/// How often `route` re-checks a full destination queue
const ENQUEUE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Batching, queueing and retry settings for one forwarder
#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    /// Records per request
    pub batch_size: usize,
    /// Longest time between flushes of a destination
    pub batch_timeout: Duration,
    /// Records each destination queue holds
    pub queue_capacity: usize,
    /// How long `route` waits for queue space
    pub enqueue_timeout: Duration,
    pub retry: RetryPolicy,
    pub on_exhausted: ExhaustedPolicy,
    /// Write timeout for the local receive-buffer fallback
    pub local_write_timeout: Duration,
    /// Time allowed to flush queues on shutdown
    pub drain_timeout: Duration,
}

impl ForwarderSettings {
    /// Settings from the `[peer_forwarder]` section for a pipeline of `workers`
    pub fn from_config(config: &PeerForwarderConfig, workers: usize) -> Self {
        Self {
            batch_size: config.forwarding_batch_size.max(1),
            batch_timeout: config.forwarding_batch_timeout(),
            queue_capacity: config.queue_capacity(workers),
            enqueue_timeout: config.enqueue_timeout(),
            retry: RetryPolicy::new(
                config.max_attempts.max(1),
                Backoff::new(config.initial_backoff(), config.max_backoff()),
            ),
            on_exhausted: config.on_exhausted,
            local_write_timeout: config.failed_forwarding_local_write_timeout(),
            drain_timeout: config.drain_timeout(),
        }
    }

    #[must_use]
    pub fn with_batch(mut self, size: usize, timeout: Duration) -> Self {
        self.batch_size = size.max(1);
        self.batch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_queue(mut self, capacity: usize, enqueue_timeout: Duration) -> Self {
        self.queue_capacity = capacity.max(1);
        self.enqueue_timeout = enqueue_timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_on_exhausted(mut self, policy: ExhaustedPolicy) -> Self {
        self.on_exhausted = policy;
        self
    }
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self::from_config(&PeerForwarderConfig::default(), 1)
    }
}

/// Collaborators shared by every forwarder of a node
#[derive(Clone)]
pub struct ForwarderContext {
    pub membership: Arc<Membership>,
    pub client: Arc<dyn PeerClient>,
    pub dead_letter: Option<Arc<dyn DeadLetterQueue>>,
}

impl std::fmt::Debug for ForwarderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwarderContext")
            .field("membership", &self.membership)
            .field("dead_letter", &self.dead_letter.as_ref().map(|d| d.name()))
            .finish()
    }
}

struct Inner {
    pipeline: String,
    plugin_id: String,
    keys: Vec<KeyPath>,
    settings: ForwarderSettings,
    context: ForwarderContext,
    receive: ReceiveBuffer,
    metrics: ForwarderMetrics,
    cancel: CancellationToken,
}

/// Routes records for one (pipeline, processor) pair
pub struct PeerForwarder {
    inner: Arc<Inner>,
    destinations: DashMap<String, MAsyncTx<Record<Event>>>,
    /// Membership version the destinations were last pruned against
    ring_version: AtomicU64,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl PeerForwarder {
    pub fn new(
        pipeline: impl Into<String>,
        plugin_id: impl Into<String>,
        keys: Vec<KeyPath>,
        settings: ForwarderSettings,
        context: ForwarderContext,
        receive: ReceiveBuffer,
    ) -> Self {
        let ring_version = AtomicU64::new(context.membership.version());
        Self {
            inner: Arc::new(Inner {
                pipeline: pipeline.into(),
                plugin_id: plugin_id.into(),
                keys,
                settings,
                context,
                receive,
                metrics: ForwarderMetrics::default(),
                cancel: CancellationToken::new(),
            }),
            destinations: DashMap::new(),
            ring_version,
            tracker: TaskTracker::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.inner.pipeline
    }

    pub fn plugin_id(&self) -> &str {
        &self.inner.plugin_id
    }

    pub fn identification_keys(&self) -> &[KeyPath] {
        &self.inner.keys
    }

    /// Buffer holding records received from peers for this stage
    pub fn receive_buffer(&self) -> &ReceiveBuffer {
        &self.inner.receive
    }

    pub fn metrics(&self) -> ForwarderMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Destinations with an open queue
    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    /// Split a batch by owner, queue the remote part, return the local part
    ///
    /// Order among the returned records follows the input.
    pub async fn route(&self, records: Vec<Record<Event>>) -> Vec<Record<Event>> {
        if records.is_empty() {
            return records;
        }

        let inner = &self.inner;
        let metrics = &inner.metrics;
        let version = inner.context.membership.version();
        let ring = inner.context.membership.ring();
        let local_addr = inner.context.membership.local();
        if self.ring_version.swap(version, Ordering::AcqRel) != version {
            self.prune(&ring);
        }

        let mut local = Vec::with_capacity(records.len());
        let mut remote: HashMap<String, Vec<Record<Event>>> = HashMap::new();
        let mut missing = 0usize;

        for record in records {
            let Some(key) = PartitionKey::from_event(record.data(), &inner.keys) else {
                missing += 1;
                local.push(record);
                continue;
            };
            match ring.owner(key.hash()) {
                Some(owner) if owner != local_addr => {
                    remote.entry(owner.to_string()).or_default().push(record);
                }
                _ => local.push(record),
            }
        }

        ForwarderMetrics::add(&metrics.records_missing_identification_keys, missing);
        ForwarderMetrics::add(&metrics.records_to_be_processed_locally, local.len());

        for (peer, group) in remote {
            ForwarderMetrics::add(&metrics.records_to_be_forwarded, group.len());
            let failed = self.enqueue(&peer, group).await;
            if !failed.is_empty() {
                ForwarderMetrics::add(&metrics.records_failed_forwarding, failed.len());
                tracing::debug!(
                    pipeline = %inner.pipeline,
                    plugin_id = %inner.plugin_id,
                    %peer,
                    records = failed.len(),
                    "forwarding queue full, processing locally"
                );
                local.extend(failed);
            }
        }

        ForwarderMetrics::add(&metrics.records_actually_processed_locally, local.len());
        local
    }

    /// Close the queues of peers that left the ring
    ///
    /// Their tasks flush what is already queued, then exit.
    fn prune(&self, ring: &HashRing) {
        let before = self.destinations.len();
        self.destinations.retain(|peer, _| ring.contains(peer));
        let removed = before.saturating_sub(self.destinations.len());
        if removed > 0 {
            tracing::debug!(
                pipeline = %self.inner.pipeline,
                plugin_id = %self.inner.plugin_id,
                removed,
                "closed queues for departed peers"
            );
        }
    }

    /// Queue records for `peer`, returning the ones that did not fit in time
    async fn enqueue(&self, peer: &str, records: Vec<Record<Event>>) -> Vec<Record<Event>> {
        let Some(sender) = self.sender(peer) else {
            return records;
        };

        let deadline = Instant::now() + self.inner.settings.enqueue_timeout;
        let mut pending = records.into_iter();
        while let Some(mut record) = pending.next() {
            loop {
                match sender.try_send(record) {
                    Ok(()) => break,
                    Err(TrySendError::Full(back)) if Instant::now() < deadline => {
                        record = back;
                        tokio::time::sleep(ENQUEUE_POLL_INTERVAL).await;
                    }
                    Err(TrySendError::Full(back) | TrySendError::Disconnected(back)) => {
                        let mut failed = vec![back];
                        failed.extend(pending);
                        return failed;
                    }
                }
            }
        }
        Vec::new()
    }

    fn sender(&self, peer: &str) -> Option<MAsyncTx<Record<Event>>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        if let Some(sender) = self.destinations.get(peer) {
            return Some(sender.value().clone());
        }

        let sender = self
            .destinations
            .entry(peer.to_string())
            .or_insert_with(|| {
                let (tx, rx) = crossfire::mpsc::bounded_async::<Record<Event>>(
                    self.inner.settings.queue_capacity.max(1),
                );
                self.tracker.spawn(run_destination(
                    Arc::clone(&self.inner),
                    peer.to_string(),
                    rx,
                ));
                tx
            })
            .value()
            .clone();
        Some(sender)
    }

    /// Flush every queue and stop the destination tasks
    ///
    /// Queued batches get `drain_timeout` to finish; after that pending
    /// retries are abandoned and their batches take the exhausted path.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the senders lets each destination drain and exit
        self.destinations.clear();
        self.tracker.close();

        let drain = self.inner.settings.drain_timeout;
        if tokio::time::timeout(drain, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                pipeline = %self.inner.pipeline,
                plugin_id = %self.inner.plugin_id,
                drain_secs = drain.as_secs(),
                "forwarder drain timed out, abandoning retries"
            );
            self.inner.cancel.cancel();
            self.tracker.wait().await;
        }

        let snapshot = self.metrics();
        tracing::info!(
            pipeline = %self.inner.pipeline,
            plugin_id = %self.inner.plugin_id,
            forwarded = snapshot.records_successfully_forwarded,
            failed = snapshot.records_failed_forwarding,
            dropped = snapshot.records_dropped,
            "peer forwarder stopped"
        );
    }
}

impl std::fmt::Debug for PeerForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerForwarder")
            .field("pipeline", &self.inner.pipeline)
            .field("plugin_id", &self.inner.plugin_id)
            .field("destinations", &self.destinations.len())
            .finish()
    }
}

async fn run_destination(inner: Arc<Inner>, peer: String, queue: AsyncRx<Record<Event>>) {
    let batch_size = inner.settings.batch_size;
    let mut batch = Vec::with_capacity(batch_size);
    let mut last_flush = Instant::now();

    loop {
        let flush_at = last_flush + inner.settings.batch_timeout;
        match tokio::time::timeout_at(flush_at, queue.recv()).await {
            Ok(Ok(record)) => {
                batch.push(record);
                if batch.len() >= batch_size {
                    inner.send(&peer, std::mem::take(&mut batch)).await;
                    last_flush = Instant::now();
                }
            }
            // All senders dropped and the queue is empty
            Ok(Err(_)) => break,
            Err(_) => {
                if !batch.is_empty() {
                    inner.send(&peer, std::mem::take(&mut batch)).await;
                }
                last_flush = Instant::now();
            }
        }
    }

    if !batch.is_empty() {
        inner.send(&peer, batch).await;
    }
    tracing::debug!(pipeline = %inner.pipeline, %peer, "destination queue closed");
}

impl Inner {
    /// Forward `records` to `peer`, retrying whatever the peer has not accepted
    ///
    /// A peer may accept a prefix of the batch; only the remainder is sent
    /// again, so accepted records are never duplicated.
    async fn send(&self, peer: &str, mut records: Vec<Record<Event>>) {
        let retry = self.settings.retry;
        let mut attempts = 0u32;
        let last_error = loop {
            attempts += 1;
            let request = ForwardRequest {
                pipeline: self.pipeline.clone(),
                plugin_id: self.plugin_id.clone(),
                events: records.iter().map(|r| WireEvent::from(r.data())).collect(),
            };

            let error = match self.context.client.forward(peer, &request).await {
                Ok(accepted) => {
                    ForwarderMetrics::add(&self.metrics.requests_successful, 1);
                    let rest = records.split_off(accepted.min(records.len()));
                    ForwarderMetrics::add(
                        &self.metrics.records_successfully_forwarded,
                        records.len(),
                    );
                    release(&records, true);
                    records = rest;
                    if records.is_empty() {
                        return;
                    }
                    PeerError::rejected(
                        peer,
                        format!("{} records not accepted", records.len()),
                    )
                }
                Err(e) => {
                    ForwarderMetrics::add(&self.metrics.requests_failed, 1);
                    e
                }
            };

            if !error.is_retryable() || !retry.should_retry(attempts) {
                break error;
            }
            let delay = retry.backoff.delay(attempts - 1);
            tracing::debug!(
                pipeline = %self.pipeline,
                %peer,
                attempt = attempts,
                records = records.len(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "forwarding attempt failed"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break error,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let count = records.len();
        let err = PeerError::RetriesExhausted {
            peer: peer.to_string(),
            attempts,
            last_error: last_error.to_string(),
        };
        tracing::warn!(
            pipeline = %self.pipeline,
            plugin_id = %self.plugin_id,
            records = count,
            policy = ?self.settings.on_exhausted,
            error = %err,
            "forwarding failed"
        );
        ForwarderMetrics::add(&self.metrics.records_failed_forwarding, count);
        self.fallback(records, &err.to_string()).await;
    }

    async fn fallback(&self, records: Vec<Record<Event>>, reason: &str) {
        let records = if self.settings.on_exhausted == ExhaustedPolicy::Local {
            match self
                .receive
                .write_chunked(records, self.settings.local_write_timeout)
                .await
            {
                Ok(written) => {
                    ForwarderMetrics::add(&self.metrics.records_actually_processed_locally, written);
                    return;
                }
                Err(partial) => {
                    ForwarderMetrics::add(
                        &self.metrics.records_actually_processed_locally,
                        partial.written,
                    );
                    tracing::warn!(
                        pipeline = %self.pipeline,
                        plugin_id = %self.plugin_id,
                        written = partial.written,
                        records = partial.remaining.len(),
                        error = %partial.error,
                        "local fallback failed"
                    );
                    partial.remaining
                }
            }
        } else {
            records
        };

        if self.dead_letter(&records, reason).await {
            return;
        }

        let count = records.len();
        tracing::error!(
            pipeline = %self.pipeline,
            plugin_id = %self.plugin_id,
            records = count,
            "forwarded records dropped, no fallback accepted them"
        );
        ForwarderMetrics::add(&self.metrics.records_dropped, count);
        release(&records, false);
    }

    async fn dead_letter(&self, records: &[Record<Event>], reason: &str) -> bool {
        let Some(queue) = &self.context.dead_letter else {
            return false;
        };

        let entries: Vec<DeadLetterEntry> = records
            .iter()
            .map(|r| DeadLetterEntry::with_reason(&self.pipeline, &self.plugin_id, reason, r.data()))
            .collect();

        match queue.write(&entries).await {
            Ok(()) => {
                ForwarderMetrics::add(&self.metrics.records_dead_lettered, records.len());
                release(records, true);
                true
            }
            Err(e) => {
                tracing::error!(
                    pipeline = %self.pipeline,
                    plugin_id = %self.plugin_id,
                    dead_letter = queue.name(),
                    error = %e,
                    "dead-letter write failed"
                );
                false
            }
        }
    }
}

fn release(records: &[Record<Event>], success: bool) {
    for record in records {
        if let Some(handle) = record.data().handle() {
            handle.release(success);
        }
    }
}

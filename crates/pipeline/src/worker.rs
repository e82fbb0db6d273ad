//! Pipeline worker loop
//!
//! Each worker repeatedly reads one window from the buffer, runs it through
//! the processor chain, delivers the result to every sink and checkpoints
//! the window only when everything succeeded. A failed batch is left
//! uncommitted; the buffer hands it out again after its redelivery timeout.
//!
//! ```text
//! read ──► [route ─► drain receive buffer ─►] stage ──► ... ──► dead-letter
//!                                                         ──► sinks ──► checkpoint
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use sluice_buffer::CheckpointState;
use sluice_peer::{PeerForwarder, ReceiveBuffer};
use sluice_protocol::{Event, EventHandle, Record};
use sluice_sinks::{DeadLetterEntry, SinkResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::metrics::{FailureKind, FailureReport};
use crate::pipeline::Shared;

/// Longest pause after an empty read on a shut-down buffer
const MAX_IDLE: Duration = Duration::from_millis(100);

/// Stage name recorded on dead-letter entries written by the engine
const DEAD_LETTER_STAGE: &str = "processors";

/// Read windows taken by one batch, committed together
struct Windows {
    main: CheckpointState,
    received: Vec<(ReceiveBuffer, CheckpointState)>,
}

impl Windows {
    fn records(&self) -> usize {
        self.main.count() + self.received.iter().map(|(_, w)| w.count()).sum::<usize>()
    }
}

struct BatchFailure {
    kind: FailureKind,
    error: String,
}

impl BatchFailure {
    fn new(kind: FailureKind, error: impl ToString) -> Self {
        Self {
            kind,
            error: error.to_string(),
        }
    }
}

/// Worker task body; exits when `cancel` fires
///
/// A batch that has been read always runs to completion; cancellation is
/// only observed between batches.
pub(crate) async fn run(shared: Arc<Shared>, worker_id: usize, cancel: CancellationToken) {
    let idle = shared.settings.read_timeout.min(MAX_IDLE);
    tracing::debug!(pipeline = %shared.name, worker_id, "worker starting");

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = shared.buffer.read(shared.settings.batch_size, shared.settings.read_timeout) => read,
        };

        let (records, window) = match read {
            Ok(read) => read,
            Err(e) => {
                tracing::error!(pipeline = %shared.name, worker_id, error = %e, "buffer read failed");
                if pause(&cancel, idle).await {
                    break;
                }
                continue;
            }
        };

        // A shut-down buffer answers reads immediately; don't spin on it
        let drained = records.is_empty() && shared.buffer.is_shut_down();
        shared.process_batch(worker_id, records, window).await;

        if drained && pause(&cancel, idle).await {
            break;
        }
    }

    tracing::debug!(pipeline = %shared.name, worker_id, "worker stopped");
}

/// Sleep for `duration`; returns true if cancelled first
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

impl Shared {
    /// Process one window end to end
    ///
    /// Empty windows still run through the chain so time-based processors
    /// can emit held state.
    pub(crate) async fn process_batch(
        &self,
        worker_id: usize,
        records: Vec<Record<Event>>,
        window: CheckpointState,
    ) {
        let started = Instant::now();
        if !records.is_empty() {
            self.metrics.record_read(records.len());
        }

        let mut windows = Windows {
            main: window,
            received: Vec::new(),
        };
        let mut handles = Vec::new();

        match self.execute(records, &mut windows, &mut handles).await {
            Ok(delivered) => {
                self.commit(&windows);
                for handle in &handles {
                    handle.release(true);
                }
                if delivered > 0 || windows.records() > 0 {
                    self.metrics.record_success(started.elapsed());
                }
            }
            Err(failure) => self.report_failure(worker_id, windows.records(), failure),
        }
    }

    /// Run the chain and deliver; returns the number of records handed to sinks
    async fn execute(
        &self,
        records: Vec<Record<Event>>,
        windows: &mut Windows,
        handles: &mut Vec<EventHandle>,
    ) -> Result<usize, BatchFailure> {
        let mut current = records;

        // Records forwarded at stage 0 belong to the peer from here on
        if self.forwarder(0).is_none() {
            collect_handles(&current, handles);
        }

        for index in 0..self.chain.len() {
            if let Some(forwarder) = self.forwarder(index) {
                current = forwarder.route(current).await;
                if index == 0 {
                    collect_handles(&current, handles);
                }

                let received = self.drain_received(forwarder, windows).await?;
                collect_handles(&received, handles);
                current.extend(received);
            }

            current = self
                .chain
                .execute_stage(index, current)
                .await
                .map_err(|e| BatchFailure::new(FailureKind::Processor, e))?;
        }

        let (failed, delivered): (Vec<_>, Vec<_>) = if self.dead_letter.is_some() {
            current.into_iter().partition(|r| r.data().is_failed())
        } else {
            (Vec::new(), current)
        };
        collect_handles(&failed, handles);
        collect_handles(&delivered, handles);

        if !failed.is_empty() {
            self.dead_letter(&failed)
                .await
                .map_err(|e| BatchFailure::new(FailureKind::DeadLetter, e))?;
        }

        self.deliver(delivered).await
    }

    async fn drain_received(
        &self,
        forwarder: &PeerForwarder,
        windows: &mut Windows,
    ) -> Result<Vec<Record<Event>>, BatchFailure> {
        let receive = forwarder.receive_buffer();
        let (received, window) = receive
            .drain(self.settings.batch_size)
            .await
            .map_err(|e| BatchFailure::new(FailureKind::Receive, e))?;

        if !received.is_empty() {
            self.metrics.record_received(received.len());
            windows.received.push((receive.clone(), window));
        }
        Ok(received)
    }

    async fn dead_letter(&self, records: &[Record<Event>]) -> SinkResult<()> {
        let Some(queue) = &self.dead_letter else {
            return Ok(());
        };

        let entries: Vec<_> = records
            .iter()
            .map(|r| DeadLetterEntry::new(&self.name, DEAD_LETTER_STAGE, r.data()))
            .collect();
        queue.write(&entries).await?;

        self.metrics.record_dead_lettered(records.len());
        tracing::debug!(
            pipeline = %self.name,
            queue = queue.name(),
            records = records.len(),
            "failed records dead-lettered"
        );
        Ok(())
    }

    /// Write the batch to every sink concurrently
    ///
    /// Each write runs on its own task, so an aborted worker never cuts a
    /// sink write short.
    async fn deliver(&self, records: Vec<Record<Event>>) -> Result<usize, BatchFailure> {
        if records.is_empty() {
            return Ok(0);
        }
        let count = records.len();
        let batch = Arc::new(records);

        let writes: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| {
                let sink = Arc::clone(sink);
                let batch = Arc::clone(&batch);
                tokio::spawn(async move { sink.output(&batch).await })
            })
            .collect();

        let mut first_error = None;
        for (sink, write) in self.sinks.iter().zip(join_all(writes).await) {
            let error = match write {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("sink task failed: {e}"),
            };
            tracing::debug!(pipeline = %self.name, sink = sink.name(), error = %error, "sink write failed");
            first_error.get_or_insert_with(|| format!("sink '{}': {}", sink.name(), error));
        }

        match first_error {
            None => {
                self.metrics.record_written(count);
                Ok(count)
            }
            Some(error) => Err(BatchFailure::new(FailureKind::Sink, error)),
        }
    }

    /// Commit every window of a successful batch
    ///
    /// A rejected checkpoint only means the records may be delivered again.
    fn commit(&self, windows: &Windows) {
        if !windows.main.is_empty()
            && let Err(e) = self.buffer.checkpoint(&windows.main)
        {
            self.metrics.record_checkpoint_error();
            tracing::error!(
                pipeline = %self.name,
                window = windows.main.window_id(),
                error = %e,
                "checkpoint rejected, records may be redelivered"
            );
        }

        for (receive, window) in &windows.received {
            if let Err(e) = receive.checkpoint(window) {
                self.metrics.record_checkpoint_error();
                tracing::error!(
                    pipeline = %self.name,
                    buffer = ?receive,
                    error = %e,
                    "receive checkpoint rejected, records may be redelivered"
                );
            }
        }
    }

    fn report_failure(&self, worker_id: usize, records: usize, failure: BatchFailure) {
        self.metrics.record_failure(failure.kind);
        self.failure_log.record(&self.name, records);
        tracing::debug!(
            pipeline = %self.name,
            worker_id,
            kind = %failure.kind,
            records,
            error = %failure.error,
            "batch failed, window left for redelivery"
        );

        // No subscribers is fine
        let _ = self.failures.send(FailureReport {
            pipeline: self.name.clone(),
            worker_id,
            kind: failure.kind,
            records,
            error: failure.error,
        });
    }
}

fn collect_handles(records: &[Record<Event>], handles: &mut Vec<EventHandle>) {
    handles.extend(records.iter().filter_map(|r| r.data().handle().cloned()));
}

//! Pipeline - lifecycle and shared state
//!
//! A pipeline owns one source, one buffer, an ordered processor chain and a
//! set of sinks. `start` initializes the sinks, spawns the workers and
//! starts the source; `stop` runs the graceful shutdown sequence:
//!
//! ```text
//! source.stop ──► buffer.shutdown ──► drain buffer ──► flush processors
//!     ──► flush forwarders ──► cancel workers ──► sinks.shutdown
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use sluice_buffer::{Buffer, GatedWriter};
use sluice_peer::PeerForwarder;
use sluice_protocol::{AcknowledgementManager, Event};
use sluice_resilience::CircuitBreaker;
use sluice_sinks::{DeadLetterQueue, Sink};
use sluice_sources::{Source, SourceContext};
use sluice_transform::ProcessorChain;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::metrics::{FailureReport, FailureTracker, MetricsSnapshot, PipelineMetrics};
use crate::state::{PipelineState, StateCell};
use crate::worker;

/// Interval between drain progress checks during shutdown
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on the acknowledgement sweep interval
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Engine tunables, fixed at build time
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) workers: usize,
    pub(crate) batch_size: usize,
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) shutdown_grace: Duration,
    pub(crate) drain_timeout: Duration,
}

/// State shared between the pipeline handle and its workers
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) settings: Settings,
    pub(crate) state: StateCell,
    pub(crate) buffer: Arc<dyn Buffer<Event>>,
    pub(crate) breaker: Arc<dyn CircuitBreaker>,
    pub(crate) source: Box<dyn Source>,
    pub(crate) chain: ProcessorChain,
    /// Forwarder per chain stage, `None` for stages that run on every node
    pub(crate) forwarders: Vec<Option<Arc<PeerForwarder>>>,
    pub(crate) sinks: Vec<Arc<dyn Sink>>,
    pub(crate) dead_letter: Option<Arc<dyn DeadLetterQueue>>,
    pub(crate) acknowledgements: Option<AcknowledgementManager>,
    pub(crate) metrics: PipelineMetrics,
    pub(crate) failures: broadcast::Sender<FailureReport>,
    pub(crate) failure_log: FailureTracker,
}

impl Shared {
    #[inline]
    pub(crate) fn forwarder(&self, stage: usize) -> Option<&Arc<PeerForwarder>> {
        self.forwarders.get(stage).and_then(Option::as_ref)
    }

    fn active_forwarders(&self) -> impl Iterator<Item = &Arc<PeerForwarder>> {
        self.forwarders.iter().flatten()
    }

    fn receive_buffers_empty(&self) -> bool {
        self.active_forwarders()
            .all(|f| f.receive_buffer().is_empty())
    }
}

/// Tasks spawned by `start`
struct Running {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

/// A running or runnable pipeline
///
/// Built with [`PipelineBuilder`](crate::PipelineBuilder). Lifecycle
/// operations are safe to call from any task; `start` succeeds once.
/// `start` and `stop` never interleave: a `stop` issued while sinks are
/// still initializing waits for startup to finish, then tears down what
/// it spawned.
pub struct Pipeline {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Pipeline {
    pub(crate) fn new(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
            running: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        self.shared.state.get()
    }

    /// Point-in-time engine metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn buffer(&self) -> &Arc<dyn Buffer<Event>> {
        &self.shared.buffer
    }

    pub fn breaker(&self) -> &Arc<dyn CircuitBreaker> {
        &self.shared.breaker
    }

    pub fn chain(&self) -> &ProcessorChain {
        &self.shared.chain
    }

    pub fn source_metrics(&self) -> sluice_sources::MetricsSnapshot {
        self.shared.source.metrics()
    }

    /// Metrics of every sink, by name
    pub fn sink_metrics(&self) -> Vec<(String, sluice_sinks::MetricsSnapshot)> {
        self.shared
            .sinks
            .iter()
            .map(|s| (s.name().to_string(), s.metrics()))
            .collect()
    }

    /// Forwarders registered for this pipeline's stateful stages
    pub fn forwarders(&self) -> Vec<Arc<PeerForwarder>> {
        self.shared.active_forwarders().cloned().collect()
    }

    pub fn acknowledgements(&self) -> Option<&AcknowledgementManager> {
        self.shared.acknowledgements.as_ref()
    }

    /// Receive a report for every batch left uncommitted
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FailureReport> {
        self.shared.failures.subscribe()
    }

    /// Start the pipeline
    ///
    /// Initializes every sink, spawns the workers, then starts the source.
    /// A sink or source failure moves the pipeline to `FAILED`.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the pipeline is `INITIALIZED`;
    /// `SinkInitialize` or `SourceStart` when startup fails.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let shared = &self.shared;
        shared
            .state
            .transition(PipelineState::Initialized, PipelineState::Running)
            .map_err(|actual| {
                PipelineError::invalid_state(&shared.name, PipelineState::Initialized, actual)
            })?;

        tracing::info!(
            pipeline = %shared.name,
            workers = shared.settings.workers,
            batch_size = shared.settings.batch_size,
            processors = ?shared.chain.names(),
            sinks = shared.sinks.len(),
            forwarding_stages = shared.active_forwarders().count(),
            "pipeline starting"
        );

        for sink in &shared.sinks {
            if let Err(e) = sink.initialize().await {
                return Err(self.fail(PipelineError::SinkInitialize {
                    sink: sink.name().to_string(),
                    source: e,
                }));
            }
        }

        let cancel = CancellationToken::new();
        let workers = (0..shared.settings.workers)
            .map(|worker_id| {
                tokio::spawn(worker::run(
                    Arc::clone(shared),
                    worker_id,
                    cancel.clone(),
                ))
            })
            .collect();
        let sweeper = shared.acknowledgements.as_ref().map(|manager| {
            manager.spawn_sweeper(sweep_interval(manager.timeout()), cancel.clone())
        });
        *self.running.lock() = Some(Running {
            cancel,
            workers,
            sweeper,
        });

        let writer = GatedWriter::new(Arc::clone(&shared.buffer), Arc::clone(&shared.breaker));
        let mut context = SourceContext::new(shared.name.clone(), writer)
            .with_write_timeout(shared.settings.write_timeout);
        if let Some(manager) = &shared.acknowledgements {
            context = context.with_acknowledgements(manager.clone());
        }

        if let Err(e) = shared.source.start(context).await {
            self.cancel_tasks().await;
            return Err(self.fail(PipelineError::SourceStart(e)));
        }

        tracing::info!(pipeline = %shared.name, source = shared.source.name(), "pipeline running");
        Ok(())
    }

    /// Stop the pipeline gracefully
    ///
    /// Stops the source, lets the workers drain the buffer and the stateful
    /// processors flush, then cancels the workers. Records still buffered
    /// when the drain timeout passes stay uncommitted.
    ///
    /// Calling `stop` on a stopped pipeline is a no-op; on an initialized
    /// pipeline it moves straight to `STOPPED`. Concurrent calls queue
    /// behind the one in progress, and a call made during `start` runs
    /// once startup has finished.
    ///
    /// # Errors
    ///
    /// `InvalidState` on a failed pipeline; `ShutdownTimeout` when the
    /// workers had to be aborted. The pipeline is `STOPPED` in both
    /// the success and the timeout case.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let shared = &self.shared;
        match shared
            .state
            .transition(PipelineState::Running, PipelineState::Stopping)
        {
            Ok(()) => {}
            Err(PipelineState::Stopping | PipelineState::Stopped) => return Ok(()),
            Err(PipelineState::Initialized) => {
                if shared
                    .state
                    .transition(PipelineState::Initialized, PipelineState::Stopped)
                    .is_ok()
                {
                    tracing::info!(pipeline = %shared.name, "pipeline stopped before start");
                }
                return Ok(());
            }
            Err(actual) => {
                return Err(PipelineError::invalid_state(
                    &shared.name,
                    PipelineState::Running,
                    actual,
                ));
            }
        }

        let started = Instant::now();
        let deadline = started + shared.settings.drain_timeout;
        tracing::info!(
            pipeline = %shared.name,
            buffered = shared.buffer.len(),
            drain_timeout_secs = shared.settings.drain_timeout.as_secs(),
            "pipeline stopping"
        );

        shared.source.stop().await;
        shared.buffer.shutdown();

        if !self.wait_until(deadline, |s| s.buffer.is_empty()).await {
            tracing::warn!(
                pipeline = %shared.name,
                remaining = shared.buffer.len(),
                "buffer not drained before timeout, remaining records left uncommitted"
            );
        }

        shared.chain.prepare_for_shutdown();
        for forwarder in shared.active_forwarders() {
            forwarder.shutdown().await;
        }
        if !self
            .wait_until(deadline, |s| {
                s.chain.is_ready_for_shutdown() && s.receive_buffers_empty()
            })
            .await
        {
            tracing::warn!(
                pipeline = %shared.name,
                "processors still hold state after drain timeout"
            );
        }

        let result = self.stop_workers().await;

        shared.chain.shutdown();
        for sink in &shared.sinks {
            if let Err(e) = sink.shutdown().await {
                tracing::warn!(pipeline = %shared.name, sink = sink.name(), error = %e, "sink shutdown failed");
            }
        }
        shared.state.set(PipelineState::Stopped);

        let metrics = shared.metrics.snapshot();
        tracing::info!(
            pipeline = %shared.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            records_read = metrics.records_read,
            records_written = metrics.records_written,
            records_dead_lettered = metrics.records_dead_lettered,
            batches_succeeded = metrics.batches_succeeded,
            batches_failed = metrics.batches_failed,
            "pipeline stopped"
        );

        result
    }

    fn fail(&self, err: PipelineError) -> PipelineError {
        self.shared.state.set(PipelineState::Failed);
        tracing::error!(pipeline = %self.shared.name, error = %err, "pipeline failed");
        err
    }

    /// Cancel and join everything `start` spawned
    async fn cancel_tasks(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        join_all(running.workers).await;
        if let Some(sweeper) = running.sweeper {
            let _ = sweeper.await;
        }
    }

    /// Cancel the workers and wait up to the grace period for them to exit
    async fn stop_workers(&self) -> Result<()> {
        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };
        let grace = self.shared.settings.shutdown_grace;
        running.cancel.cancel();

        let mut workers = running.workers;
        let joined = tokio::time::timeout(grace, join_all(workers.iter_mut())).await;
        let result = match joined {
            Ok(results) => {
                for err in results.into_iter().filter_map(|r| r.err()) {
                    tracing::error!(pipeline = %self.shared.name, error = %err, "worker panicked");
                }
                Ok(())
            }
            Err(_) => {
                for worker in &workers {
                    worker.abort();
                }
                tracing::error!(
                    pipeline = %self.shared.name,
                    grace_secs = grace.as_secs(),
                    "workers did not stop within grace period, aborted"
                );
                Err(PipelineError::ShutdownTimeout(grace))
            }
        };

        if let Some(sweeper) = running.sweeper {
            let _ = sweeper.await;
        }
        result
    }

    async fn wait_until(&self, deadline: Instant, done: impl Fn(&Shared) -> bool) -> bool {
        loop {
            if done(&self.shared) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.shared.name)
            .field("state", &self.shared.state.get())
            .field("settings", &self.shared.settings)
            .field("chain", &self.shared.chain)
            .field("sinks", &self.shared.sinks.len())
            .finish()
    }
}

fn sweep_interval(timeout: Duration) -> Duration {
    (timeout / 4).clamp(Duration::from_millis(10), MAX_SWEEP_INTERVAL)
}

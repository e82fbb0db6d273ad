//! Serve command - Run the pipeline
//!
//! Builds the breakers, the optional peer-forwarding components and the
//! pipeline from configuration, then runs until SIGINT or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sluice_buffer::Buffer;
use sluice_config::{Config, Discovery};
use sluice_peer::{MembershipProvider, PeerForwarderProvider, PeerServer, StaticPeerList};
use sluice_pipeline::{Pipeline, PipelineBuilder, Plugins};
use sluice_resilience::{
    CircuitBreaker, CompositeBreaker, MemorySampler, ThresholdBreaker, spawn_monitor,
};
use sluice_sinks::{DeadLetterQueue, FileDeadLetterQueue};

use super::LoadedConfig;

/// How often buffer occupancy is sampled
const OCCUPANCY_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Run the serve command
pub async fn run(loaded: LoadedConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        config = %loaded.origin,
        "sluice starting"
    );

    if let Err(e) = run_pipeline(loaded.config).await {
        error!(error = %format!("{e:#}"), "pipeline error");
        return Err(e);
    }

    info!("sluice shutdown complete");
    Ok(())
}

/// Peer-forwarding components owned by the process
struct PeerComponents {
    provider: Arc<PeerForwarderProvider>,
    server: PeerServer,
    watcher: JoinHandle<()>,
}

impl PeerComponents {
    async fn shutdown(self) {
        self.server.stop().await;
        self.provider.shutdown().await;
        let _ = self.watcher.await;
        info!(
            requests_received = self.server.metrics().requests_received,
            records_received = self.server.metrics().records_received,
            "peer forwarding stopped"
        );
    }
}

async fn run_pipeline(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let mut monitors = Vec::new();

    // Admission gates: configured resource breakers plus buffer occupancy
    let mut breakers = CompositeBreaker::new();
    if let Some(memory) = &config.circuit_breakers.memory {
        let breaker = Arc::new(ThresholdBreaker::new(
            "memory",
            memory.usage_bytes,
            memory.reset(),
        ));
        monitors.push(spawn_monitor(
            Arc::clone(&breaker),
            MemorySampler::new(),
            memory.check_interval(),
            cancel.clone(),
        ));
        breakers.push(breaker);
        info!(usage_bytes = memory.usage_bytes, "memory circuit breaker enabled");
    }
    let occupancy = Arc::new(ThresholdBreaker::new(
        "buffer_occupancy",
        config.buffer.capacity as u64,
        Duration::ZERO,
    ));
    breakers.push(occupancy.clone());
    let breaker: Arc<dyn CircuitBreaker> = Arc::new(breakers);

    let dead_letter: Option<Arc<dyn DeadLetterQueue>> = config
        .dead_letter
        .as_ref()
        .map(|d| Arc::new(FileDeadLetterQueue::new(&d.path)) as Arc<dyn DeadLetterQueue>);

    let plugins = Plugins::builtin();
    let mut builder = PipelineBuilder::from_config(&config, &plugins)
        .context("failed to build pipeline")?
        .with_breaker(Arc::clone(&breaker));
    if let Some(queue) = &dead_letter {
        builder = builder.with_dead_letter(Arc::clone(queue));
    }

    let peer = if config.peer_forwarder.enabled {
        let peer = start_peer(&config, Arc::clone(&breaker), dead_letter, &cancel).await?;
        builder = builder.with_peer_forwarding(Arc::clone(&peer.provider));
        Some(peer)
    } else {
        None
    };

    let pipeline = builder.build().context("invalid pipeline")?;

    let buffer = Arc::clone(pipeline.buffer());
    monitors.push(spawn_monitor(
        occupancy,
        move || buffer.len() as u64,
        OCCUPANCY_CHECK_INTERVAL,
        cancel.clone(),
    ));

    let started = pipeline
        .start()
        .await
        .context("failed to start pipeline");

    let result = match started {
        Ok(()) => {
            info!(
                pipeline = %pipeline.name(),
                workers = config.pipeline.workers,
                processors = ?pipeline.chain().names(),
                sinks = pipeline.sink_metrics().len(),
                "sluice running"
            );

            wait_for_shutdown().await;
            info!("shutdown signal received, stopping pipeline...");
            pipeline.stop().await.context("pipeline did not stop cleanly")
        }
        Err(e) => Err(e),
    };

    if let Some(peer) = peer {
        peer.shutdown().await;
    }
    cancel.cancel();
    for monitor in monitors {
        let _ = monitor.await;
    }

    log_final_metrics(&pipeline);
    result
}

async fn start_peer(
    config: &Config,
    breaker: Arc<dyn CircuitBreaker>,
    dead_letter: Option<Arc<dyn DeadLetterQueue>>,
    cancel: &CancellationToken,
) -> Result<PeerComponents> {
    let settings = &config.peer_forwarder;

    let mut provider = PeerForwarderProvider::from_config(settings, breaker)
        .context("invalid peer forwarder configuration")?;
    if let Some(queue) = dead_letter {
        provider = provider.with_dead_letter(queue);
    }
    let provider = Arc::new(provider);

    let discovery: Arc<dyn MembershipProvider> = match settings.discovery {
        Discovery::Static => Arc::new(StaticPeerList::new(settings.peers.clone())),
    };
    let watcher = provider.watch(discovery, cancel.clone());

    let server = provider.server();
    let listen = match server.start().await {
        Ok(addr) => addr,
        Err(e) => {
            cancel.cancel();
            return Err(e).context("failed to start peer server");
        }
    };

    info!(
        listen = %listen,
        local = ?settings.local_address,
        peers = settings.peers.len(),
        "peer forwarding enabled"
    );

    Ok(PeerComponents {
        provider,
        server,
        watcher,
    })
}

fn log_final_metrics(pipeline: &Pipeline) {
    let metrics = pipeline.metrics();
    info!(
        records_read = metrics.records_read,
        records_written = metrics.records_written,
        records_dead_lettered = metrics.records_dead_lettered,
        batches_succeeded = metrics.batches_succeeded,
        batches_failed = metrics.batches_failed,
        "final pipeline metrics"
    );

    for (name, sink) in pipeline.sink_metrics() {
        info!(
            sink = %name,
            records_written = sink.records_written,
            write_errors = sink.write_errors,
            batches_pending = sink.batches_pending(),
            "final sink metrics"
        );
    }

    for forwarder in pipeline.forwarders() {
        let forwarded = forwarder.metrics();
        info!(
            plugin_id = %forwarder.plugin_id(),
            processed_locally = forwarded.records_actually_processed_locally,
            forwarded = forwarded.records_successfully_forwarded,
            failed = forwarded.records_failed_forwarding,
            "final forwarder metrics"
        );
    }
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

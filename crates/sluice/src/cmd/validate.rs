//! Validate command - Check a configuration without running it
//!
//! Every plugin is constructed, so unknown plugin types and bad plugin
//! settings are caught, but nothing is started: no sockets are bound and no
//! sink is initialized.

use std::sync::Arc;

use anyhow::{Context, Result};

use sluice_config::Config;
use sluice_peer::PeerForwarderProvider;
use sluice_pipeline::{PipelineBuilder, Plugins};
use sluice_resilience::CompositeBreaker;

use super::LoadedConfig;

/// Run the validate command
pub async fn run(loaded: LoadedConfig) -> Result<()> {
    let summary = check(&loaded.config)?;
    println!("{}: ok", loaded.origin);
    println!("{summary}");
    Ok(())
}

/// Build everything the configuration describes and summarize it
fn check(config: &Config) -> Result<String> {
    let mut builder = PipelineBuilder::from_config(config, &Plugins::builtin())
        .context("failed to build pipeline")?;

    if config.peer_forwarder.enabled {
        let provider = PeerForwarderProvider::from_config(
            &config.peer_forwarder,
            Arc::new(CompositeBreaker::new()),
        )
        .context("invalid peer forwarder configuration")?;
        builder = builder.with_peer_forwarding(Arc::new(provider));
    }

    let pipeline = builder.build().context("invalid pipeline")?;

    let mut summary = format!(
        "  pipeline:   {} ({} workers, batch {})\n  source:     {}\n  processors: {:?}\n  sinks:      {}",
        pipeline.name(),
        config.pipeline.workers,
        config.pipeline.batch_size,
        config.source.plugin_type,
        pipeline.chain().names(),
        pipeline
            .sink_metrics()
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>()
            .join(", "),
    );
    for forwarder in pipeline.forwarders() {
        summary.push_str(&format!("\n  forwarded:  {}", forwarder.plugin_id()));
    }
    Ok(summary)
}

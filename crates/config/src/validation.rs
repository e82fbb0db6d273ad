//! Cross-field configuration checks
//!
//! Serde covers types and enum spellings; what is left here is what only
//! makes sense across keys: non-zero sizes, a batch that fits the buffer, a
//! ring that contains this node, a dead-letter target for the dead-letter
//! fallback.
//!
//! Plugin types are checked by the registries when the pipeline is built.

use crate::Config;
use crate::error::{ConfigError, Result};
use crate::peer::{Discovery, ExhaustedPolicy};

pub fn validate_config(config: &Config) -> Result<()> {
    if !config.sinks.iter().any(|s| s.enabled) {
        return Err(ConfigError::NoSinksEnabled);
    }
    validate_buffer(config)?;
    validate_pipeline(config)?;
    validate_peer_forwarder(config)?;
    validate_circuit_breakers(config)
}

/// Reject a zero value for `section.key`
fn positive(section: &'static str, key: &'static str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ConfigError::invalid(section, key, "must be greater than 0"));
    }
    Ok(())
}

fn validate_pipeline(config: &Config) -> Result<()> {
    let pipeline = &config.pipeline;
    if pipeline.name.trim().is_empty() {
        return Err(ConfigError::missing("pipeline", "name"));
    }
    positive("pipeline", "workers", pipeline.workers as u64)?;
    positive("pipeline", "batch_size", pipeline.batch_size as u64)?;

    if pipeline.batch_size > config.buffer.capacity {
        return Err(ConfigError::invalid(
            "pipeline",
            "batch_size",
            format!(
                "{} exceeds buffer capacity {}",
                pipeline.batch_size, config.buffer.capacity
            ),
        ));
    }
    Ok(())
}

fn validate_buffer(config: &Config) -> Result<()> {
    let buffer = &config.buffer;
    positive("buffer", "capacity", buffer.capacity as u64)?;
    positive("buffer", "redelivery_timeout_ms", buffer.redelivery_timeout_ms)?;
    if let Some(max_bytes) = buffer.max_bytes {
        positive("buffer", "max_bytes", max_bytes as u64)?;
    }
    Ok(())
}

fn validate_peer_forwarder(config: &Config) -> Result<()> {
    const SECTION: &str = "peer_forwarder";

    let peer = &config.peer_forwarder;
    if !peer.enabled {
        return Ok(());
    }

    let local = peer
        .local_address
        .as_deref()
        .ok_or_else(|| ConfigError::missing(SECTION, "local_address"))?;

    match peer.discovery {
        Discovery::Static => {
            if peer.peers.is_empty() {
                return Err(ConfigError::missing(SECTION, "peers"));
            }
            if !peer.peers.iter().any(|p| p == local) {
                return Err(ConfigError::invalid(
                    SECTION,
                    "local_address",
                    format!("'{local}' is not in the static peer list"),
                ));
            }
        }
    }

    positive(SECTION, "virtual_nodes", peer.virtual_nodes as u64)?;
    positive(SECTION, "forwarding_batch_size", peer.forwarding_batch_size as u64)?;
    positive(SECTION, "forwarding_queue_depth", peer.forwarding_queue_depth as u64)?;
    positive(SECTION, "receive_buffer_capacity", peer.receive_buffer_capacity as u64)?;
    positive(SECTION, "max_attempts", u64::from(peer.max_attempts))?;

    if peer.forwarding_batch_size > peer.receive_buffer_capacity {
        return Err(ConfigError::invalid(
            SECTION,
            "forwarding_batch_size",
            format!(
                "{} exceeds receive_buffer_capacity {}",
                peer.forwarding_batch_size, peer.receive_buffer_capacity
            ),
        ));
    }

    if peer.on_exhausted == ExhaustedPolicy::DeadLetter && config.dead_letter.is_none() {
        return Err(ConfigError::invalid(
            SECTION,
            "on_exhausted",
            "dead_letter fallback requires a [dead_letter] section",
        ));
    }
    Ok(())
}

fn validate_circuit_breakers(config: &Config) -> Result<()> {
    if let Some(memory) = &config.circuit_breakers.memory {
        positive("circuit_breakers.memory", "usage_bytes", memory.usage_bytes)?;
        positive("circuit_breakers.memory", "check_interval_ms", memory.check_interval_ms)?;
    }
    Ok(())
}

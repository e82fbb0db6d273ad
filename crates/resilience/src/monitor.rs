//! Resource monitor feeding a threshold breaker

use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::breaker::ThresholdBreaker;

/// Source of a resource measurement
pub trait ResourceSampler: Send + 'static {
    /// Take one sample
    fn sample(&mut self) -> u64;
}

impl<F> ResourceSampler for F
where
    F: FnMut() -> u64 + Send + 'static,
{
    fn sample(&mut self) -> u64 {
        self()
    }
}

/// Samples used system memory in bytes
pub struct MemorySampler {
    system: System,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for MemorySampler {
    fn sample(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.used_memory()
    }
}

/// Refresh `breaker` from `sampler` every `interval` until cancelled
pub fn spawn_monitor(
    breaker: Arc<ThresholdBreaker>,
    mut sampler: impl ResourceSampler,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    breaker.refresh(sampler.sample());
                }
            }
        }
        tracing::debug!("resource monitor stopped");
    })
}

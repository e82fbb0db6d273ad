//! Sluice Resilience - Admission control and retry policy
//!
//! - [`CircuitBreaker`] - boolean admission gate consulted before buffer writes
//! - [`FlagBreaker`], [`CompositeBreaker`], [`ThresholdBreaker`] - implementations
//! - [`ResourceSampler`] / [`spawn_monitor`] - refresh a threshold breaker on a schedule
//! - [`Backoff`] / [`RetryPolicy`] - capped exponential retry delays
//!
//! Breakers are injected as `Arc<dyn CircuitBreaker>`; there is no global
//! breaker state.

mod backoff;
mod breaker;
mod monitor;

pub use backoff::{Backoff, RetryPolicy};
pub use breaker::{CircuitBreaker, CompositeBreaker, FlagBreaker, ThresholdBreaker};
pub use monitor::{MemorySampler, ResourceSampler, spawn_monitor};

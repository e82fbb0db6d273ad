//! Circuit breakers
//!
//! A breaker is a single open/closed flag. Reading it is one atomic load;
//! state changes come from an external monitor on its own schedule.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[cfg(test)]
#[path = "breaker_test.rs"]
mod tests;

/// Admission gate: when open, new data must not enter the pipeline
pub trait CircuitBreaker: Send + Sync {
    /// Whether new data should be rejected
    fn is_open(&self) -> bool;

    /// Breaker name for logging
    fn name(&self) -> &str {
        "circuit_breaker"
    }
}

/// Breaker driven directly by `open()` / `close()`
#[derive(Debug)]
pub struct FlagBreaker {
    name: String,
    open: AtomicBool,
}

impl FlagBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: AtomicBool::new(false),
        }
    }

    /// Open the breaker
    pub fn open(&self) {
        self.set(true);
    }

    /// Close the breaker
    pub fn close(&self) {
        self.set(false);
    }

    /// Set the breaker state, logging transitions
    pub fn set(&self, open: bool) {
        let was_open = self.open.swap(open, Ordering::AcqRel);
        if was_open != open {
            tracing::debug!(breaker = %self.name, open, "circuit breaker state changed");
        }
    }
}

impl CircuitBreaker for FlagBreaker {
    #[inline]
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Logical OR of several breakers: open if any member is open
#[derive(Clone, Default)]
pub struct CompositeBreaker {
    breakers: Vec<Arc<dyn CircuitBreaker>>,
}

impl CompositeBreaker {
    /// Create an empty composite (always closed)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member breaker
    #[must_use]
    pub fn with(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breakers.push(breaker);
        self
    }

    /// Add a member breaker in place
    pub fn push(&mut self, breaker: Arc<dyn CircuitBreaker>) {
        self.breakers.push(breaker);
    }

    /// Number of member breakers
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether there are no member breakers
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl CircuitBreaker for CompositeBreaker {
    fn is_open(&self) -> bool {
        self.breakers.iter().any(|b| b.is_open())
    }

    fn name(&self) -> &str {
        "composite"
    }
}

impl fmt::Debug for CompositeBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.breakers.iter().map(|b| b.name()).collect();
        f.debug_struct("CompositeBreaker")
            .field("breakers", &names)
            .finish()
    }
}

/// Breaker that opens when a sampled value reaches a threshold
///
/// Once open it stays open for at least `reset`, then closes on the first
/// refresh whose sample is below the threshold.
#[derive(Debug)]
pub struct ThresholdBreaker {
    name: String,
    threshold: u64,
    reset: Duration,
    open: AtomicBool,
    opened_at: Mutex<Option<Instant>>,
}

impl ThresholdBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, threshold: u64, reset: Duration) -> Self {
        Self {
            name: name.into(),
            threshold,
            reset,
            open: AtomicBool::new(false),
            opened_at: Mutex::new(None),
        }
    }

    /// Configured threshold
    #[inline]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Feed a new sample, opening or closing the breaker
    pub fn refresh(&self, usage: u64) {
        self.refresh_at(usage, Instant::now());
    }

    /// Feed a new sample observed at `now`
    pub fn refresh_at(&self, usage: u64, now: Instant) {
        let mut opened_at = self.opened_at.lock();

        if usage >= self.threshold {
            if opened_at.is_none() {
                tracing::warn!(
                    breaker = %self.name,
                    usage,
                    threshold = self.threshold,
                    "circuit breaker opened"
                );
            }
            *opened_at = Some(now);
            self.open.store(true, Ordering::Release);
            return;
        }

        if let Some(since) = *opened_at
            && now.duration_since(since) >= self.reset
        {
            *opened_at = None;
            self.open.store(false, Ordering::Release);
            tracing::info!(
                breaker = %self.name,
                usage,
                threshold = self.threshold,
                "circuit breaker closed"
            );
        }
    }
}

impl CircuitBreaker for ThresholdBreaker {
    #[inline]
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

//! Breaker-gated write path into a buffer
//!
//! Every record that enters a pipeline, whether from the source or from a
//! peer, goes through a [`GatedWriter`]. While the circuit breaker is open
//! nothing is written; once it closes, writes resume without a restart.

use std::sync::Arc;
use std::time::Duration;

use sluice_protocol::Record;
use sluice_resilience::{Backoff, CircuitBreaker};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::buffer::Buffer;
use crate::error::{BufferError, Result};

/// How often a blocked writer re-checks the breaker
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Writes into a buffer only while the circuit breaker is closed
pub struct GatedWriter<T> {
    buffer: Arc<dyn Buffer<T>>,
    breaker: Arc<dyn CircuitBreaker>,
    poll_interval: Duration,
}

impl<T> Clone for GatedWriter<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            breaker: Arc::clone(&self.breaker),
            poll_interval: self.poll_interval,
        }
    }
}

impl<T> GatedWriter<T>
where
    T: Send + 'static,
{
    pub fn new(buffer: Arc<dyn Buffer<T>>, breaker: Arc<dyn CircuitBreaker>) -> Self {
        Self {
            buffer,
            breaker,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how often a blocked writer re-checks the breaker
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The underlying buffer
    pub fn buffer(&self) -> &Arc<dyn Buffer<T>> {
        &self.buffer
    }

    /// The gating breaker
    pub fn breaker(&self) -> &Arc<dyn CircuitBreaker> {
        &self.breaker
    }

    /// Write one record
    pub async fn write(&self, record: Record<T>, timeout: Duration) -> Result<()> {
        self.write_all(vec![record], timeout).await
    }

    /// Write records all-or-nothing
    ///
    /// Waits up to `timeout` in total, first for the breaker to close and
    /// then for buffer space.
    pub async fn write_all(&self, records: Vec<Record<T>>, timeout: Duration) -> Result<()> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        while self.breaker.is_open() {
            let now = Instant::now();
            if now >= deadline {
                return Err(BufferError::CircuitOpen(self.breaker.name().to_string()));
            }
            tokio::time::sleep_until((now + self.poll_interval).min(deadline)).await;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        self.buffer.write_all(records, remaining).await
    }
}

impl<T> GatedWriter<T>
where
    T: Clone + Send + 'static,
{
    /// Write records, retrying admission errors with backoff until cancelled
    ///
    /// Non-retryable errors (shutdown, oversized batch) return immediately.
    /// On cancellation the last admission error is returned.
    pub async fn write_all_with_retry(
        &self,
        records: Vec<Record<T>>,
        timeout: Duration,
        backoff: Backoff,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let err = match self.write_all(records.clone(), timeout).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            let delay = backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            tracing::debug!(
                buffer = %self.buffer.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "write not admitted, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

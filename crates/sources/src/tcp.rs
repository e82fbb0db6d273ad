//! TCP Source - newline-delimited JSON
//!
//! Each line received on a connection is one JSON object:
//!
//! ```text
//! {"message":"started","service":"api"}\n
//! {"message":"failed","service":"api","status":500}\n
//! ```
//!
//! Lines that are not JSON objects are counted as invalid and skipped; the
//! connection stays open. Lines longer than `max_line_bytes` are discarded
//! up to the next newline.
//!
//! # Design
//!
//! - **Per-connection tasks**: Each connection spawns its own handler task,
//!   tracked so that `stop()` waits for all of them
//! - **Batch building**: Parsed events accumulate until `batch_size` or the
//!   flush interval, then go through the gated writer in one write
//! - **Backpressure**: While the breaker is open or the buffer is full the
//!   handler stops reading, so TCP flow control pushes back on the client

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use serde_json::Value;
use sluice_config::PluginConfig;
use sluice_protocol::{Event, Record};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::registry::SourceFactory;
use crate::{
    MetricsSnapshot, Source, SourceContext, SourceError, SourceMetrics, SourceResult, write_batch,
};

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tests;

/// Default listen address
const DEFAULT_ADDRESS: &str = "0.0.0.0:5170";

/// Default batch size (events before flush)
const DEFAULT_BATCH_SIZE: usize = 500;

/// Default flush interval for partial batches
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Default maximum line length (1MB)
const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Initial read buffer per connection
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// TCP source configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSourceConfig {
    /// Listen address (host:port)
    pub address: String,

    /// Event type assigned to parsed events
    pub event_type: String,

    /// Maximum events per buffer write
    pub batch_size: usize,

    /// Flush interval for partial batches
    pub flush_interval: Duration,

    /// Longest accepted line in bytes
    pub max_line_bytes: usize,

    /// TCP keepalive enabled
    pub keepalive: bool,
}

impl Default for TcpSourceConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            event_type: "log".into(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            keepalive: true,
        }
    }
}

impl TcpSourceConfig {
    /// Create a config listening on `address`
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.address.is_empty() {
            return Err("address must not be empty".into());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        if self.max_line_bytes == 0 {
            return Err("max_line_bytes must be greater than 0".into());
        }
        if self.flush_interval.is_zero() {
            return Err("flush_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

impl TryFrom<&PluginConfig> for TcpSourceConfig {
    type Error = String;

    fn try_from(config: &PluginConfig) -> Result<Self, Self::Error> {
        let defaults = Self::default();
        let size = |key: &str, default: usize| -> Result<usize, String> {
            match config.get_int(key) {
                None => Ok(default),
                Some(v) => usize::try_from(v).map_err(|_| format!("{} must not be negative", key)),
            }
        };

        let flush_interval = match config.get_int("flush_interval_ms") {
            None => defaults.flush_interval,
            Some(ms) => Duration::from_millis(
                u64::try_from(ms).map_err(|_| "flush_interval_ms must not be negative")?,
            ),
        };

        let parsed = Self {
            address: config
                .get_str("address")
                .map_or(defaults.address, str::to_string),
            event_type: config
                .get_str("event_type")
                .map_or(defaults.event_type, str::to_string),
            batch_size: size("batch_size", defaults.batch_size)?,
            flush_interval,
            max_line_bytes: size("max_line_bytes", defaults.max_line_bytes)?,
            keepalive: config.get_bool("keepalive").unwrap_or(defaults.keepalive),
        };
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Parse one line into an event
pub(crate) fn parse_line(line: &[u8], event_type: &str) -> Result<Event, String> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(map)) => Ok(Event::from_map(event_type, map)),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Strip a trailing carriage return and surrounding ASCII whitespace
fn trim_line(line: &[u8]) -> &[u8] {
    line.trim_ascii()
}

struct Shared {
    config: TcpSourceConfig,
    context: SourceContext,
    metrics: Arc<SourceMetrics>,
}

struct Running {
    cancel: CancellationToken,
    tracker: TaskTracker,
    local_addr: SocketAddr,
}

/// TCP source accepting newline-delimited JSON
pub struct TcpSource {
    config: TcpSourceConfig,
    running: Mutex<Option<Running>>,
    metrics: Arc<SourceMetrics>,
}

impl TcpSource {
    pub fn new(config: TcpSourceConfig) -> SourceResult<Self> {
        config.validate().map_err(SourceError::config)?;
        Ok(Self {
            config,
            running: Mutex::new(None),
            metrics: Arc::new(SourceMetrics::new()),
        })
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, peer_addr)) => {
                    shared.metrics.connection_opened();

                    let shared = Arc::clone(&shared);
                    let cancel = cancel.clone();
                    tracker.spawn(async move {
                        if let Err(e) = handle_connection(&shared, stream, &cancel).await {
                            tracing::debug!(
                                pipeline = %shared.context.pipeline,
                                peer = %peer_addr,
                                error = %e,
                                "connection closed with error"
                            );
                        }
                        shared.metrics.connection_closed();
                    });
                }
                Err(e) => {
                    // Transient accept errors - log and continue
                    tracing::warn!(error = %e, "accept error");
                }
            }
        }
    }
}

fn configure_socket(stream: &TcpStream, keepalive: bool) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }

    if keepalive {
        let sock_ref = SockRef::from(stream);
        let params = TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(10));
        if let Err(e) = sock_ref.set_tcp_keepalive(&params) {
            tracing::debug!(error = %e, "failed to set TCP keepalive");
        }
    }
}

fn push_line(shared: &Shared, line: &[u8], pending: &mut Vec<Record<Event>>) {
    let line = trim_line(line);
    if line.is_empty() {
        return;
    }
    match parse_line(line, &shared.config.event_type) {
        Ok(event) => {
            shared.metrics.received(1, 0);
            pending.push(Record::new(event));
        }
        Err(reason) => {
            shared.metrics.invalid();
            tracing::debug!(pipeline = %shared.context.pipeline, %reason, "invalid line skipped");
        }
    }
}

async fn flush(
    shared: &Shared,
    pending: &mut Vec<Record<Event>>,
    cancel: &CancellationToken,
) -> SourceResult<()> {
    if pending.is_empty() {
        return Ok(());
    }
    let records = std::mem::take(pending);
    write_batch(&shared.context, &shared.metrics, records, cancel).await
}

async fn handle_connection(
    shared: &Shared,
    mut stream: TcpStream,
    cancel: &CancellationToken,
) -> SourceResult<()> {
    configure_socket(&stream, shared.config.keepalive);

    let max_line = shared.config.max_line_bytes;
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut pending: Vec<Record<Event>> = Vec::new();
    let mut discarding = false;

    let mut ticker = tokio::time::interval(shared.config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return flush(shared, &mut pending, cancel).await;
            }
            _ = ticker.tick() => {
                flush(shared, &mut pending, cancel).await?;
            }
            read = stream.read_buf(&mut buf) => {
                let n = read?;
                if n == 0 {
                    // EOF - a final line may lack its newline
                    if !discarding && !buf.is_empty() {
                        let line = buf.split();
                        push_line(shared, &line, &mut pending);
                    }
                    return flush(shared, &mut pending, cancel).await;
                }
                shared.metrics.received(0, n as u64);

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    if discarding {
                        discarding = false;
                        continue;
                    }
                    if pos > max_line {
                        shared.metrics.invalid();
                        tracing::debug!(max_line, "line too long, discarding");
                        continue;
                    }
                    push_line(shared, &line[..pos], &mut pending);
                }

                if buf.len() > max_line {
                    if !discarding {
                        shared.metrics.invalid();
                        tracing::debug!(max_line, "line too long, discarding");
                    }
                    buf.clear();
                    discarding = true;
                }

                if pending.len() >= shared.config.batch_size {
                    flush(shared, &mut pending, cancel).await?;
                }
            }
        }
    }
}

#[async_trait]
impl Source for TcpSource {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn start(&self, context: SourceContext) -> SourceResult<()> {
        if self.running.lock().is_some() {
            return Err(SourceError::AlreadyRunning("tcp".into()));
        }

        let listener = TcpListener::bind(&self.config.address)
            .await
            .map_err(|e| SourceError::Bind {
                address: self.config.address.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            pipeline = %context.pipeline,
            address = %local_addr,
            "TCP source listening"
        );

        let shared = Arc::new(Shared {
            config: self.config.clone(),
            context,
            metrics: Arc::clone(&self.metrics),
        });
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(accept_loop(
            listener,
            shared,
            tracker.clone(),
            cancel.clone(),
        ));

        let mut running = self.running.lock();
        if running.is_some() {
            // lost a race with a concurrent start
            cancel.cancel();
            return Err(SourceError::AlreadyRunning("tcp".into()));
        }
        *running = Some(Running {
            cancel,
            tracker,
            local_addr,
        });
        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        running.tracker.close();
        running.tracker.wait().await;
        tracing::info!(address = %running.local_addr, "TCP source stopped");
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for TcpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSource")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Factory for creating TCP sources
#[derive(Debug, Clone, Copy)]
pub struct TcpSourceFactory;

impl SourceFactory for TcpSourceFactory {
    fn create(&self, config: &PluginConfig) -> SourceResult<Box<dyn Source>> {
        let tcp_config = TcpSourceConfig::try_from(config).map_err(SourceError::config)?;
        Ok(Box::new(TcpSource::new(tcp_config)?))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

//! Peer RPC server
//!
//! Accepts [`ForwardRequest`] frames from peers and writes the events into
//! the receive buffer registered for the request's (pipeline, processor).
//! Writes go through the buffer's gated writer, so an open circuit breaker
//! rejects forwarded data exactly like locally-sourced data. Batches larger
//! than the receive buffer are written in capacity-sized chunks; when a later
//! chunk fails the reply accepts only the written prefix. A request with
//! nothing written is answered with [`ForwardResponse::Rejected`], flagged
//! retryable unless the buffer can never take it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use sluice_protocol::{
    Event, ForwardRequest, ForwardResponse, Record, decode_frame, encode_frame,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{PeerError, PeerResult};
use crate::receive::ReceiveBuffers;

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port)
    pub address: String,

    /// How long a request may wait for receive buffer space
    pub write_timeout: Duration,
}

impl ServerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            write_timeout: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Server counters
#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub connections_total: AtomicU64,
    pub requests_received: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub records_received: AtomicU64,
}

impl ServerMetrics {
    pub fn snapshot(&self) -> ServerMetricsSnapshot {
        ServerMetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            records_received: self.records_received.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerMetricsSnapshot {
    pub connections_total: u64,
    pub requests_received: u64,
    pub requests_rejected: u64,
    pub records_received: u64,
}

struct Running {
    cancel: CancellationToken,
    tracker: TaskTracker,
    local_addr: SocketAddr,
}

/// Receiving side of peer forwarding
pub struct PeerServer {
    config: ServerConfig,
    receivers: ReceiveBuffers,
    metrics: Arc<ServerMetrics>,
    running: Mutex<Option<Running>>,
}

impl PeerServer {
    pub fn new(config: ServerConfig, receivers: ReceiveBuffers) -> Self {
        Self {
            config,
            receivers,
            metrics: Arc::new(ServerMetrics::default()),
            running: Mutex::new(None),
        }
    }

    /// Bind and start accepting; returns the bound address
    pub async fn start(&self) -> PeerResult<SocketAddr> {
        if let Some(running) = self.running.lock().as_ref() {
            return Ok(running.local_addr);
        }

        let listener = TcpListener::bind(&self.config.address)
            .await
            .map_err(|e| PeerError::Bind {
                address: self.config.address.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr().map_err(|e| PeerError::Bind {
            address: self.config.address.clone(),
            source: e,
        })?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let shared = Arc::new(Shared {
            write_timeout: self.config.write_timeout,
            receivers: self.receivers.clone(),
            metrics: Arc::clone(&self.metrics),
        });
        tracker.spawn(accept_loop(listener, shared, tracker.clone(), cancel.clone()));

        tracing::info!(address = %local_addr, "peer server listening");
        *self.running.lock() = Some(Running {
            cancel,
            tracker,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Stop accepting and close every connection
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        running.tracker.close();
        running.tracker.wait().await;
        tracing::info!(address = %running.local_addr, "peer server stopped");
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    pub fn metrics(&self) -> ServerMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for PeerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerServer")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

struct Shared {
    write_timeout: Duration,
    receivers: ReceiveBuffers,
    metrics: Arc<ServerMetrics>,
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
                    shared.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
                    }

                    let shared = Arc::clone(&shared);
                    let cancel = cancel.clone();
                    tracker.spawn(async move {
                        if let Err(e) = handle_connection(&shared, stream, &cancel).await {
                            tracing::debug!(peer = %peer_addr, error = %e, "peer connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "peer accept error");
                }
            }
        }
    }
}

async fn handle_connection(
    shared: &Shared,
    mut stream: TcpStream,
    cancel: &CancellationToken,
) -> PeerResult<()> {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        while let Some(request) = decode_frame::<ForwardRequest>(&mut buf)? {
            let response = handle_request(shared, request).await;
            let frame = encode_frame(&response)?;
            stream
                .write_all(&frame)
                .await
                .map_err(|e| PeerError::connection(&peer, e))?;
        }

        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = stream.read_buf(&mut buf) => read.map_err(|e| PeerError::connection(&peer, e))?,
        };
        if n == 0 {
            return Ok(());
        }
    }
}

async fn handle_request(shared: &Shared, request: ForwardRequest) -> ForwardResponse {
    shared
        .metrics
        .requests_received
        .fetch_add(1, Ordering::Relaxed);

    let Some(receiver) = shared.receivers.get(&request.pipeline, &request.plugin_id) else {
        shared
            .metrics
            .requests_rejected
            .fetch_add(1, Ordering::Relaxed);
        // The stage may not have registered yet on a node that is starting
        return ForwardResponse::Rejected {
            reason: format!(
                "no receive buffer for pipeline '{}' processor '{}'",
                request.pipeline, request.plugin_id
            ),
            retryable: true,
        };
    };

    let count = request.events.len();
    let records: Vec<Record<Event>> = request
        .events
        .into_iter()
        .map(|wire| Record::new(Event::from(wire)))
        .collect();

    let (written, failure) = match receiver.write_chunked(records, shared.write_timeout).await {
        Ok(written) => (written, None),
        Err(partial) => (partial.written, Some(partial.error)),
    };
    shared
        .metrics
        .records_received
        .fetch_add(written as u64, Ordering::Relaxed);

    match failure {
        None => ForwardResponse::Accepted { records: written },
        Some(e) if written > 0 => {
            tracing::debug!(
                pipeline = %request.pipeline,
                plugin_id = %request.plugin_id,
                records = count,
                written,
                error = %e,
                "forwarded batch partially accepted"
            );
            ForwardResponse::Accepted { records: written }
        }
        Some(e) => {
            shared
                .metrics
                .requests_rejected
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                pipeline = %request.pipeline,
                plugin_id = %request.plugin_id,
                records = count,
                error = %e,
                "forwarded batch rejected"
            );
            ForwardResponse::Rejected {
                reason: e.to_string(),
                retryable: e.is_retryable(),
            }
        }
    }
}

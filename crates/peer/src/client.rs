//! Peer RPC client
//!
//! Sends a [`ForwardRequest`] frame to a peer and waits for its
//! [`ForwardResponse`] on the same connection. One connection is kept per
//! peer and reused; any transport error or timeout drops it so that the
//! next request reconnects.
//!
//! # Protocol
//!
//! ```text
//! [4 bytes: length (big-endian)][N bytes: JSON ForwardRequest]   ->
//! [4 bytes: length (big-endian)][N bytes: JSON ForwardResponse]  <-
//! ```

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use sluice_protocol::{ForwardRequest, ForwardResponse, decode_frame, encode_frame};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{PeerError, PeerResult};

/// Transport used by the forwarder to reach peers
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Ship a batch to `peer`, returning the number of records it accepted
    async fn forward(&self, peer: &str, request: &ForwardRequest) -> PeerResult<usize>;
}

/// Client timeouts and socket options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,

    /// Deadline for writing a request and reading its response
    pub request_timeout: Duration,

    pub keepalive: bool,

    /// Keepalive idle time and probe interval
    pub keepalive_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            keepalive: true,
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }
}

struct Connection {
    peer: String,
    stream: TcpStream,
    read_buf: BytesMut,
}

impl Connection {
    async fn exchange(&mut self, frame: &[u8]) -> PeerResult<ForwardResponse> {
        self.stream
            .write_all(frame)
            .await
            .map_err(|e| PeerError::connection(&self.peer, e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| PeerError::connection(&self.peer, e))?;

        loop {
            if let Some(response) = decode_frame::<ForwardResponse>(&mut self.read_buf)? {
                return Ok(response);
            }
            let n = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(|e| PeerError::connection(&self.peer, e))?;
            if n == 0 {
                return Err(PeerError::connection(
                    &self.peer,
                    std::io::Error::new(ErrorKind::UnexpectedEof, "peer closed the connection"),
                ));
            }
        }
    }
}

type Slot = Arc<Mutex<Option<Connection>>>;

/// TCP implementation of [`PeerClient`]
pub struct TcpPeerClient {
    config: ClientConfig,
    connections: DashMap<String, Slot>,
    connects: AtomicU64,
}

impl TcpPeerClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connections: DashMap::new(),
            connects: AtomicU64::new(0),
        }
    }

    /// Connections established so far, reconnects included
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    fn slot(&self, peer: &str) -> Slot {
        if let Some(slot) = self.connections.get(peer) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.connections.entry(peer.to_string()).or_default().value())
    }

    async fn connect(&self, peer: &str) -> PeerResult<Connection> {
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(peer)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(PeerError::connection(peer, e)),
            Err(_) => return Err(PeerError::timeout(peer, self.config.connect_timeout)),
        };

        // Set TCP_NODELAY for lower latency (non-fatal if it fails)
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }

        if self.config.keepalive {
            let sock_ref = SockRef::from(&stream);
            let keepalive = TcpKeepalive::new().with_time(self.config.keepalive_interval);

            #[cfg(target_os = "linux")]
            let keepalive = keepalive.with_interval(self.config.keepalive_interval);

            if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
                tracing::debug!(%peer, error = %e, "failed to set TCP keep-alive");
            }
        }

        self.connects.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%peer, "connected to peer");

        Ok(Connection {
            peer: peer.to_string(),
            stream,
            read_buf: BytesMut::with_capacity(1024),
        })
    }
}

impl Default for TcpPeerClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[async_trait]
impl PeerClient for TcpPeerClient {
    async fn forward(&self, peer: &str, request: &ForwardRequest) -> PeerResult<usize> {
        let frame = encode_frame(request)?;

        let slot = self.slot(peer);
        let mut conn = slot.lock().await;
        if conn.is_none() {
            *conn = Some(self.connect(peer).await?);
        }
        let Some(connection) = conn.as_mut() else {
            return Err(PeerError::connection(
                peer,
                std::io::Error::new(ErrorKind::NotConnected, "no connection"),
            ));
        };

        match timeout(self.config.request_timeout, connection.exchange(&frame)).await {
            Ok(Ok(ForwardResponse::Accepted { records })) => Ok(records),
            Ok(Ok(ForwardResponse::Rejected { reason, retryable })) => Err(PeerError::Rejected {
                peer: peer.to_string(),
                reason,
                retryable,
            }),
            Ok(Err(e)) => {
                // Stream state is unknown - invalidate connection
                *conn = None;
                Err(e)
            }
            Err(_) => {
                *conn = None;
                Err(PeerError::timeout(peer, self.config.request_timeout))
            }
        }
    }
}

impl std::fmt::Debug for TcpPeerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpPeerClient")
            .field("config", &self.config)
            .field("peers", &self.connections.len())
            .field("connects", &self.connect_count())
            .finish()
    }
}

//! Peer forwarder configuration
//!
//! # Example
//!
//! ```toml
//! [peer_forwarder]
//! enabled = true
//! local_address = "10.0.0.1:4994"
//! peers = ["10.0.0.1:4994", "10.0.0.2:4994", "10.0.0.3:4994"]
//! on_exhausted = "dead_letter"
//! ```

use serde::Deserialize;
use std::time::Duration;

/// How fleet membership is discovered
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Discovery {
    /// Fixed peer list from `peers`
    #[default]
    Static,
}

/// What happens to a remote batch once forwarding retries are exhausted
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Process the batch on this node
    #[default]
    Local,
    /// Hand the batch to the dead-letter queue
    DeadLetter,
}

/// Peer forwarder settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerForwarderConfig {
    pub enabled: bool,

    /// This node's address as it appears in the peer list
    pub local_address: Option<String>,

    /// Address the RPC server binds to
    pub listen_address: String,

    pub discovery: Discovery,

    /// Static peer list (must include `local_address`)
    pub peers: Vec<String>,

    /// Virtual nodes per peer on the hash ring
    pub virtual_nodes: usize,

    /// Records per forwarding request
    pub forwarding_batch_size: usize,

    /// A partial batch is flushed after this long
    pub forwarding_batch_timeout_ms: u64,

    /// Per-destination queue depth, in batches per worker
    pub forwarding_queue_depth: usize,

    /// How long routing may block on a full destination queue
    pub enqueue_timeout_ms: u64,

    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,

    pub on_exhausted: ExhaustedPolicy,

    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,

    /// Capacity of each per-(pipeline, processor) receive buffer
    ///
    /// Must hold at least one forwarding batch.
    pub receive_buffer_capacity: usize,

    /// Write timeout when a failed forward falls back to the local receive buffer
    pub failed_forwarding_local_write_timeout_ms: u64,

    /// Time allowed to flush queued batches on shutdown
    pub drain_timeout_secs: u64,
}

impl Default for PeerForwarderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            local_address: None,
            listen_address: "0.0.0.0:4994".into(),
            discovery: Discovery::Static,
            peers: Vec::new(),
            virtual_nodes: 128,
            forwarding_batch_size: 1500,
            forwarding_batch_timeout_ms: 3000,
            forwarding_queue_depth: 1,
            enqueue_timeout_ms: 500,
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            on_exhausted: ExhaustedPolicy::Local,
            request_timeout_ms: 10_000,
            connect_timeout_ms: 5000,
            receive_buffer_capacity: 12_000,
            failed_forwarding_local_write_timeout_ms: 500,
            drain_timeout_secs: 10,
        }
    }
}

impl PeerForwarderConfig {
    pub fn forwarding_batch_timeout(&self) -> Duration {
        Duration::from_millis(self.forwarding_batch_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn failed_forwarding_local_write_timeout(&self) -> Duration {
        Duration::from_millis(self.failed_forwarding_local_write_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Capacity of each destination queue for the given worker count
    pub fn queue_capacity(&self, workers: usize) -> usize {
        self.forwarding_batch_size
            .saturating_mul(workers.max(1))
            .saturating_mul(self.forwarding_queue_depth.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: PeerForwarderConfig = toml::from_str("").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.discovery, Discovery::Static);
        assert_eq!(config.on_exhausted, ExhaustedPolicy::Local);
        assert_eq!(config.virtual_nodes, 128);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_full() {
        let toml = r#"
enabled = true
local_address = "10.0.0.1:4994"
peers = ["10.0.0.1:4994", "10.0.0.2:4994"]
on_exhausted = "dead_letter"
forwarding_batch_size = 100
forwarding_queue_depth = 2
"#;
        let config: PeerForwarderConfig = toml::from_str(toml).unwrap();
        assert!(config.enabled);
        assert_eq!(config.local_address.as_deref(), Some("10.0.0.1:4994"));
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.on_exhausted, ExhaustedPolicy::DeadLetter);
        assert_eq!(config.queue_capacity(4), 800);
    }

    #[test]
    fn test_queue_capacity_floors_workers() {
        let config = PeerForwarderConfig::default();
        assert_eq!(config.queue_capacity(0), 1500);
    }

    #[test]
    fn test_unknown_discovery_rejected() {
        assert!(toml::from_str::<PeerForwarderConfig>("discovery = \"dns\"").is_err());
    }
}

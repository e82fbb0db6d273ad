//! Peer forwarding errors

use std::time::Duration;

use sluice_protocol::WireError;
use thiserror::Error;

/// Result type for peer operations
pub type PeerResult<T> = Result<T, PeerError>;

/// Errors from the peer client, server and forwarder
#[derive(Debug, Error)]
pub enum PeerError {
    /// Could not reach or talk to a peer
    #[error("connection to {peer} failed: {source}")]
    Connection {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect or request deadline passed
    #[error("request to {peer} timed out after {timeout:?}")]
    Timeout { peer: String, timeout: Duration },

    /// The peer answered but refused the batch
    #[error("peer {peer} rejected the request: {reason}")]
    Rejected {
        peer: String,
        reason: String,
        retryable: bool,
    },

    /// Frame could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] WireError),

    /// Every forwarding attempt failed
    #[error("forwarding to {peer} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        peer: String,
        attempts: u32,
        last_error: String,
    },

    /// The membership snapshot has no nodes
    #[error("fleet membership is empty")]
    NoMembers,

    /// RPC server could not bind
    #[error("failed to bind peer server to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid forwarder settings
    #[error("configuration error: {0}")]
    Config(String),
}

impl PeerError {
    pub fn connection(peer: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connection {
            peer: peer.into(),
            source,
        }
    }

    pub fn timeout(peer: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            peer: peer.into(),
            timeout,
        }
    }

    /// A refusal that may clear up, such as a full buffer
    pub fn rejected(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            peer: peer.into(),
            reason: reason.into(),
            retryable: true,
        }
    }

    /// A refusal the same batch will always get
    pub fn refused(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            peer: peer.into(),
            reason: reason.into(),
            retryable: false,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Rejected { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

//! Sluice - Peer Forwarding
//!
//! Routes records between the nodes of a fleet so that every record with
//! the same identification-key values reaches the same node, which lets
//! stateful processors (aggregation, sessionization) run on a horizontally
//! scaled deployment.
//!
//! # Architecture
//!
//! ```text
//!            node A                                   node B
//! [worker] ─► PeerForwarder ── ForwardRequest ──► PeerServer
//!    ▲            │ local part                          │
//!    │            ▼                                     ▼
//!    └──── processor stage ◄── ReceiveBuffer   ReceiveBuffer ──► processor stage
//! ```
//!
//! - [`HashRing`]: consistent hashing with virtual nodes
//! - [`Membership`]: atomically swapped ring fed by a [`MembershipProvider`]
//! - [`PeerForwarder`]: per-stage routing, batching, retry and fallback
//! - [`PeerServer`] / [`TcpPeerClient`]: length-prefixed JSON frames over TCP
//! - [`PeerForwarderProvider`]: node-wide wiring of the above

// =============================================================================
// Routing
// =============================================================================

/// Consistent-hash ring
pub mod ring;

/// Hashing of identification-key values
pub mod partition;

/// Fleet membership and ring updates
pub mod membership;

/// Per-stage forwarder
pub mod forwarder;

/// Node-wide provider
pub mod provider;

// =============================================================================
// Transport
// =============================================================================

pub mod client;
pub mod server;

/// Receive buffers addressed by (pipeline, processor)
pub mod receive;

mod error;
mod metrics;

// =============================================================================
// Public re-exports
// =============================================================================

pub use client::{ClientConfig, PeerClient, TcpPeerClient};
pub use error::{PeerError, PeerResult};
pub use forwarder::{ForwarderContext, ForwarderSettings, PeerForwarder};
pub use membership::{Destination, Membership, MembershipProvider, StaticPeerList};
pub use metrics::{ForwarderMetrics, ForwarderMetricsSnapshot};
pub use partition::PartitionKey;
pub use provider::PeerForwarderProvider;
pub use receive::{PartialWrite, ReceiveBuffer, ReceiveBuffers};
pub use ring::{DEFAULT_VIRTUAL_NODES, HashRing};
pub use server::{PeerServer, ServerConfig, ServerMetrics, ServerMetricsSnapshot};

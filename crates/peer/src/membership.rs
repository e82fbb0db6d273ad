//! Fleet membership
//!
//! A [`MembershipProvider`] supplies the current peer list and notifies on
//! change. [`Membership`] turns each list into a [`HashRing`] and swaps it
//! in atomically, so routing never sees a half-built ring.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{PeerError, PeerResult};
use crate::partition::PartitionKey;
use crate::ring::HashRing;

/// Source of fleet membership
pub trait MembershipProvider: Send + Sync {
    /// Current peer addresses
    fn members(&self) -> Vec<String>;

    /// Receiver that observes every membership change
    fn subscribe(&self) -> watch::Receiver<Vec<String>>;
}

/// Membership from a configured peer list
///
/// The list can be replaced at runtime with [`set_members`](Self::set_members).
#[derive(Debug)]
pub struct StaticPeerList {
    sender: watch::Sender<Vec<String>>,
}

impl StaticPeerList {
    pub fn new(peers: Vec<String>) -> Self {
        let (sender, _) = watch::channel(peers);
        Self { sender }
    }

    /// Replace the peer list and notify subscribers
    pub fn set_members(&self, peers: Vec<String>) {
        self.sender.send_replace(peers);
    }
}

impl MembershipProvider for StaticPeerList {
    fn members(&self) -> Vec<String> {
        self.sender.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.sender.subscribe()
    }
}

/// Where a partition key is processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local,
    Remote(String),
}

/// Routing view of the fleet from this node
pub struct Membership {
    local: String,
    virtual_nodes: usize,
    ring: ArcSwap<HashRing>,
    version: AtomicU64,
}

impl Membership {
    /// Create a view for the node at `local`
    pub fn new(local: impl Into<String>, members: Vec<String>, virtual_nodes: usize) -> Self {
        Self {
            local: local.into(),
            virtual_nodes,
            ring: ArcSwap::from_pointee(HashRing::new(members, virtual_nodes)),
            version: AtomicU64::new(0),
        }
    }

    /// This node's address
    pub fn local(&self) -> &str {
        &self.local
    }

    /// Current ring snapshot
    pub fn ring(&self) -> Arc<HashRing> {
        self.ring.load_full()
    }

    /// Number of membership updates applied
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Rebuild the ring for a new member list
    pub fn update(&self, members: Vec<String>) {
        let ring = HashRing::new(members, self.virtual_nodes);
        if !ring.is_empty() && !ring.contains(&self.local) {
            tracing::warn!(
                local = %self.local,
                members = ring.len(),
                "local node is not part of the fleet membership"
            );
        }
        tracing::info!(members = ?ring.members(), "fleet membership updated");
        self.ring.store(Arc::new(ring));
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Destination of a key against the current snapshot
    pub fn destination(&self, key: PartitionKey) -> PeerResult<Destination> {
        let ring = self.ring.load();
        let owner = ring.owner(key.hash()).ok_or(PeerError::NoMembers)?;
        if owner == self.local {
            Ok(Destination::Local)
        } else {
            Ok(Destination::Remote(owner.to_string()))
        }
    }

    /// Follow a provider's updates until cancelled
    pub fn spawn_watcher(
        self: &Arc<Self>,
        provider: Arc<dyn MembershipProvider>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let membership = Arc::clone(self);
        let mut updates = provider.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let members = updates.borrow_and_update().clone();
                        membership.update(members);
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("local", &self.local)
            .field("members", &self.ring.load().members())
            .field("version", &self.version())
            .finish()
    }
}

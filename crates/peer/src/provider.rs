//! Node-wide peer forwarding
//!
//! One [`PeerForwarderProvider`] per process owns the membership view, the
//! peer client and the registry of receive buffers. Pipelines register a
//! forwarder for every processor stage that declares identification keys;
//! the [`PeerServer`] built from the same provider writes incoming batches
//! into the matching receive buffers.

use std::sync::Arc;

use parking_lot::Mutex;
use sluice_config::PeerForwarderConfig;
use sluice_protocol::KeyPath;
use sluice_resilience::CircuitBreaker;
use sluice_sinks::DeadLetterQueue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientConfig, PeerClient, TcpPeerClient};
use crate::error::{PeerError, PeerResult};
use crate::forwarder::{ForwarderContext, ForwarderSettings, PeerForwarder};
use crate::membership::{Membership, MembershipProvider};
use crate::receive::{ReceiveBuffer, ReceiveBuffers};
use crate::server::{PeerServer, ServerConfig};

/// Shared peer-forwarding state for one node
pub struct PeerForwarderProvider {
    config: PeerForwarderConfig,
    context: ForwarderContext,
    receivers: ReceiveBuffers,
    breaker: Arc<dyn CircuitBreaker>,
    forwarders: Mutex<Vec<Arc<PeerForwarder>>>,
}

impl PeerForwarderProvider {
    pub fn new(
        config: PeerForwarderConfig,
        membership: Arc<Membership>,
        client: Arc<dyn PeerClient>,
        breaker: Arc<dyn CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            context: ForwarderContext {
                membership,
                client,
                dead_letter: None,
            },
            receivers: ReceiveBuffers::new(),
            breaker,
            forwarders: Mutex::new(Vec::new()),
        }
    }

    /// Provider with a TCP client and a static ring built from `config.peers`
    ///
    /// The local address is added to the ring when the peer list omits it.
    pub fn from_config(
        config: &PeerForwarderConfig,
        breaker: Arc<dyn CircuitBreaker>,
    ) -> PeerResult<Self> {
        let local = config
            .local_address
            .clone()
            .ok_or_else(|| PeerError::config("peer_forwarder.local_address is required"))?;

        let mut members = config.peers.clone();
        if !members.contains(&local) {
            members.push(local.clone());
        }

        let membership = Arc::new(Membership::new(local, members, config.virtual_nodes));
        let client = Arc::new(TcpPeerClient::new(
            ClientConfig::default()
                .with_connect_timeout(config.connect_timeout())
                .with_request_timeout(config.request_timeout()),
        ));
        Ok(Self::new(config.clone(), membership, client, breaker))
    }

    /// Dead-letter queue for batches whose forwarding is exhausted
    #[must_use]
    pub fn with_dead_letter(mut self, queue: Arc<dyn DeadLetterQueue>) -> Self {
        self.context.dead_letter = Some(queue);
        self
    }

    pub fn config(&self) -> &PeerForwarderConfig {
        &self.config
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.context.membership
    }

    pub fn receivers(&self) -> &ReceiveBuffers {
        &self.receivers
    }

    /// Create the forwarder and receive buffer for one processor stage
    ///
    /// `plugin_id` must match on every node of the fleet; peers address the
    /// receive buffer by (pipeline, plugin_id).
    pub fn register(
        &self,
        pipeline: &str,
        plugin_id: &str,
        keys: Vec<KeyPath>,
        workers: usize,
    ) -> Arc<PeerForwarder> {
        let receive = ReceiveBuffer::new(
            pipeline,
            plugin_id,
            self.config.receive_buffer_capacity,
            Arc::clone(&self.breaker),
        );
        self.receivers.register(pipeline, plugin_id, receive.clone());

        let forwarder = Arc::new(PeerForwarder::new(
            pipeline,
            plugin_id,
            keys,
            ForwarderSettings::from_config(&self.config, workers),
            self.context.clone(),
            receive,
        ));
        self.forwarders.lock().push(Arc::clone(&forwarder));

        tracing::info!(
            pipeline,
            plugin_id,
            members = self.context.membership.ring().len(),
            "peer forwarder registered"
        );
        forwarder
    }

    /// Server that accepts batches for this node's receive buffers
    pub fn server(&self) -> PeerServer {
        PeerServer::new(
            ServerConfig::new(&self.config.listen_address)
                .with_write_timeout(self.config.failed_forwarding_local_write_timeout()),
            self.receivers.clone(),
        )
    }

    /// Apply membership changes from `provider` until cancelled
    pub fn watch(
        &self,
        provider: Arc<dyn MembershipProvider>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        self.context.membership.update(provider.members());
        self.context.membership.spawn_watcher(provider, cancel)
    }

    /// Drain and stop every registered forwarder
    pub async fn shutdown(&self) {
        let forwarders = std::mem::take(&mut *self.forwarders.lock());
        for forwarder in forwarders {
            forwarder.shutdown().await;
        }
    }
}

impl std::fmt::Debug for PeerForwarderProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerForwarderProvider")
            .field("context", &self.context)
            .field("receivers", &self.receivers.len())
            .field("forwarders", &self.forwarders.lock().len())
            .finish()
    }
}

//! The host facade: one fully wired overlay node.
//!
//! Composes the registry, route table, peer manager, router, node, socket,
//! and RPC endpoint, so applications configure a builder and get
//! `send`/`recv` instead of hand-assembling the stack. The builder also
//! encodes the default wiring: next-hop resolution through the route
//! table, REGISTER envelopes into dynamic registration, and multi-hop
//! route learning off observed traffic.

use crate::node::{Node, NodeError};
use crate::peer_manager::{PeerManager, PeerManagerError, SendError};
use crate::registry::AddressRegistry;
use crate::route::RouteTable;
use crate::router::Router;
use crate::rpc::RpcEndpoint;
use crate::socket::{IncomingMessage, RouterSender, Socket, SocketError};
use envelop_core::envelope::FLAG_REGISTER;
use envelop_core::{EnvelopeBuilder, EnvelopeStrategy, KeyPair, PeerId, SimpleStrategy};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Errors assembling or running a host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("listen address not set")]
    MissingListen,
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    PeerManager(#[from] PeerManagerError),
    #[error("local address unavailable: {0}")]
    LocalAddr(#[from] std::io::Error),
}

/// A complete overlay node.
pub struct Host {
    id: PeerId,
    name: String,
    addr: SocketAddr,
    registry: Arc<AddressRegistry>,
    route_table: Arc<RouteTable>,
    peers: Arc<PeerManager>,
    node: Arc<Node>,
    socket: Arc<Socket>,
    rpc: Arc<RpcEndpoint>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Host {
    /// This node's peer ID.
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The shared address registry, for bootstrap wiring.
    pub fn registry(&self) -> &Arc<AddressRegistry> {
        &self.registry
    }

    /// The route table, for bootstrap wiring.
    pub fn route_table(&self) -> &Arc<RouteTable> {
        &self.route_table
    }

    /// The RPC endpoint bound to this host's socket.
    pub fn rpc(&self) -> &Arc<RpcEndpoint> {
        &self.rpc
    }

    /// Outbound delivery, for tests and tools that pre-build envelopes.
    pub fn peer_manager(&self) -> &Arc<PeerManager> {
        &self.peers
    }

    /// Start the accept loop. Idempotent.
    pub fn start(&self) {
        let mut task = self.accept_task.lock();
        if task.is_none() {
            *task = Some(tokio::spawn(self.node.clone().run()));
        }
    }

    /// Stop the node: close the listener, the connection pool, and the
    /// socket. Idempotent; pending `recv` calls drain then end.
    pub fn stop(&self) {
        self.node.close();
        self.peers.close();
        self.socket.close();
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }

    /// Send application bytes to a peer.
    pub async fn send(&self, dest: PeerId, payload: &[u8]) -> Result<(), SocketError> {
        self.socket.send(dest, payload).await
    }

    /// Next incoming application message.
    pub async fn recv(&self) -> Option<IncomingMessage> {
        self.socket.recv().await
    }

    /// Advertise this node's current address to a relay: sends a REGISTER
    /// control envelope so the relay binds our ID to the address it
    /// observes. The relay must already be resolvable.
    pub async fn register_at(&self, relay: PeerId) -> Result<(), SendError> {
        let env = EnvelopeBuilder::new()
            .flags(FLAG_REGISTER)
            .ttl(1)
            .dest(relay)
            .return_peer(self.id)
            .build();
        self.peers.send_to_peer(relay, &env).await
    }
}

/// Progressive configuration for a [`Host`].
#[derive(Default)]
pub struct HostBuilder {
    name: String,
    listen: Option<SocketAddr>,
    key: Option<KeyPair>,
    registry: Option<Arc<AddressRegistry>>,
    route_table: Option<Arc<RouteTable>>,
    strategy: Option<Arc<dyn EnvelopeStrategy>>,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node name used in logs.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Listen address; port 0 picks an ephemeral port.
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen = Some(addr);
        self
    }

    /// Use a specific identity instead of generating one.
    pub fn key(mut self, key: KeyPair) -> Self {
        self.key = Some(key);
        self
    }

    /// Share a registry with other hosts (tests, co-located nodes).
    pub fn registry(mut self, registry: Arc<AddressRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn route_table(mut self, route_table: Arc<RouteTable>) -> Self {
        self.route_table = Some(route_table);
        self
    }

    /// Envelope strategy; defaults to plaintext single-layer.
    pub fn strategy(mut self, strategy: Arc<dyn EnvelopeStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Assemble and wire the host. Must run inside a tokio runtime; the
    /// listener binds here, but accepting starts with [`Host::start`].
    pub fn build(self) -> Result<Host, HostError> {
        let listen = self.listen.ok_or(HostError::MissingListen)?;
        let key = self.key.unwrap_or_else(KeyPair::generate);
        let self_id = key.peer_id();

        let registry = self.registry.unwrap_or_default();
        let route_table = self.route_table.unwrap_or_default();
        route_table.bind_self(self_id);
        // A node can always deliver to itself.
        route_table.learn_direct(self_id);

        let resolver_registry = registry.clone();
        let peers = Arc::new(PeerManager::new(Box::new(move |id| {
            resolver_registry.resolve(id)
        }))?);

        let router = Arc::new(Router::new(self_id));

        let lookup_table = route_table.clone();
        router.set_next_hop(move |dest| lookup_table.lookup(dest));

        let forward_peers = peers.clone();
        router.set_send(move |next_hop, env| {
            let peers = forward_peers.clone();
            tokio::spawn(async move {
                if let Err(e) = peers.send_to_peer(next_hop, &env).await {
                    warn!(next = %next_hop, error = %e, "forward failed");
                }
            });
        });
        router.set_on_register(move |id| {
            debug!(peer = %id, "register observed by router");
        });

        let node = Arc::new(Node::bind(&self.name, listen, router.clone(), registry.clone())?);
        let addr = node.local_addr()?;
        registry.register_static(self_id, &addr.to_string());

        // REGISTER binds the claimed identity to the observed address and
        // marks the peer directly reachable.
        let register_registry = registry.clone();
        let register_routes = route_table.clone();
        node.set_on_register_peer(move |id, observed_addr| {
            register_registry.register_peer(id, &observed_addr);
            register_routes.learn_direct(id);
        });

        // Multi-hop route learning: an envelope relayed by `from` whose
        // return address is someone else teaches "to reach that someone,
        // go via `from`".
        let learn_routes = route_table.clone();
        node.set_on_envelope(move |from, env| {
            if from.is_zero() {
                return;
            }
            let ret = env.return_peer_id;
            if !ret.is_zero() && ret != from {
                learn_routes.learn_via(ret, from);
            } else {
                learn_routes.learn_direct(from);
            }
        });

        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(SimpleStrategy::plaintext()));

        let sender = Arc::new(RouterSender::new(router.clone(), peers.clone()));
        let socket = Socket::new(self_id, strategy, sender.clone(), Arc::downgrade(&router));

        let rpc = RpcEndpoint::new(self_id, sender);
        socket.attach_rpc(rpc.clone());

        let payload_socket = socket.clone();
        router.set_on_payload(move |env| payload_socket.deliver(env));

        Ok(Host {
            id: self_id,
            name: self.name,
            addr,
            registry,
            route_table,
            peers,
            node,
            socket,
            rpc,
            accept_task: Mutex::new(None),
        })
    }
}

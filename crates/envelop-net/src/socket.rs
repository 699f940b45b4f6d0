//! The application-facing socket: `send(dest, payload)` on the way out,
//! a bounded stream of incoming messages on the way in.
//!
//! Outgoing, the active strategy shapes the envelope stack and an
//! [`EnvelopeSender`] moves the outermost envelope one hop. Incoming, the
//! router's payload sink lands here; the strategy interprets the layer
//! and the socket either queues the application bytes or re-injects a
//! peeled envelope into the router.

use crate::peer_manager::{PeerManager, SendError};
use crate::router::Router;
use crate::rpc::RpcEndpoint;
use async_trait::async_trait;
use envelop_core::{Envelope, EnvelopeStrategy, Incoming, PeerId, SendContext, StrategyError};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bound on undelivered incoming messages. Beyond it, new messages are
/// dropped rather than blocking the router.
pub const INCOMING_BUFFER: usize = 128;

/// Socket errors.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket closed")]
    Closed,
    #[error("no route to {0}")]
    NoNextHop(PeerId),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// A message the router accepted as final application data.
#[derive(Debug)]
pub struct IncomingMessage {
    /// The logical sender: the innermost layer's return address.
    pub from: PeerId,
    /// Application bytes (a defensive copy of the envelope's inner
    /// payload).
    pub payload: Vec<u8>,
    /// The envelope itself, for callers that want TTL or flags.
    pub envelope: Envelope,
}

/// Moves one outermost envelope toward its destination. The socket does
/// not care how: next-hop resolution, pooling, and QUIC live below this
/// seam.
#[async_trait]
pub trait EnvelopeSender: Send + Sync {
    async fn send_envelope(&self, env: Envelope) -> Result<(), SocketError>;
}

/// The default sender: resolve a next hop through the router's wiring,
/// then hand off to the peer manager.
pub struct RouterSender {
    router: Arc<Router>,
    peers: Arc<PeerManager>,
}

impl RouterSender {
    pub fn new(router: Arc<Router>, peers: Arc<PeerManager>) -> Self {
        Self { router, peers }
    }
}

#[async_trait]
impl EnvelopeSender for RouterSender {
    async fn send_envelope(&self, env: Envelope) -> Result<(), SocketError> {
        let dest = env.dest_peer_id;
        let next_hop = self
            .router
            .next_hop(dest)
            .ok_or(SocketError::NoNextHop(dest))?;
        self.peers.send_to_peer(next_hop, &env).await?;
        Ok(())
    }
}

/// Application entry point over one node.
pub struct Socket {
    self_id: PeerId,
    strategy: Arc<dyn EnvelopeStrategy>,
    sender: Arc<dyn EnvelopeSender>,
    /// `None` after close; dropping the sender half ends `recv`.
    incoming_tx: Mutex<Option<mpsc::Sender<IncomingMessage>>>,
    incoming_rx: tokio::sync::Mutex<mpsc::Receiver<IncomingMessage>>,
    /// For re-injecting peeled onion layers. Weak: the router's payload
    /// sink holds the strong reference to us.
    router: Weak<Router>,
    rpc: OnceLock<Arc<RpcEndpoint>>,
}

impl Socket {
    pub fn new(
        self_id: PeerId,
        strategy: Arc<dyn EnvelopeStrategy>,
        sender: Arc<dyn EnvelopeSender>,
        router: Weak<Router>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        Arc::new(Self {
            self_id,
            strategy,
            sender,
            incoming_tx: Mutex::new(Some(tx)),
            incoming_rx: tokio::sync::Mutex::new(rx),
            router,
            rpc: OnceLock::new(),
        })
    }

    /// Route inbound RPC-flagged envelopes to this endpoint instead of
    /// the application channel.
    pub fn attach_rpc(&self, rpc: Arc<RpcEndpoint>) {
        let _ = self.rpc.set(rpc);
    }

    /// Send application bytes to a destination peer. The strategy builds
    /// the envelope stack; failures surface synchronously, no retry.
    pub async fn send(&self, dest: PeerId, payload: &[u8]) -> Result<(), SocketError> {
        if self.incoming_tx.lock().is_none() {
            return Err(SocketError::Closed);
        }

        let outer = self.strategy.build_outgoing(SendContext {
            from: self.self_id,
            to: dest,
            payload: payload.to_vec(),
        })?;
        self.sender.send_envelope(outer).await
    }

    /// Next incoming application message. `None` once the socket closed
    /// and the buffer drained.
    pub async fn recv(&self) -> Option<IncomingMessage> {
        self.incoming_rx.lock().await.recv().await
    }

    /// Router payload sink: interpret the layer, then deliver or
    /// re-inject.
    pub fn deliver(&self, env: Envelope) {
        match self.strategy.handle_incoming(env) {
            Ok(Incoming::Business(env)) => {
                if env.is_rpc() {
                    if let Some(rpc) = self.rpc.get() {
                        rpc.dispatch(env);
                        return;
                    }
                }
                self.enqueue(env);
            }
            Ok(Incoming::Inner(inner)) => {
                // The strategy peeled a layer the router should route.
                if let Some(router) = self.router.upgrade() {
                    router.handle_envelope(inner);
                }
            }
            Err(e) => warn!(error = %e, "strategy rejected incoming envelope"),
        }
    }

    fn enqueue(&self, env: Envelope) {
        let tx = self.incoming_tx.lock();
        let Some(tx) = tx.as_ref() else {
            return; // closed; drop silently
        };

        let msg = IncomingMessage {
            from: env.return_peer_id,
            payload: env.inner_payload.clone(),
            envelope: env,
        };

        match tx.try_send(msg) {
            Ok(()) => debug!("incoming message queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("incoming buffer full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Close the socket. Idempotent: the first call drops the channel's
    /// send half; subsequent sends fail and `recv` drains then ends.
    pub fn close(&self) {
        self.incoming_tx.lock().take();
    }
}

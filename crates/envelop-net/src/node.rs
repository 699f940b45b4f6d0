//! The inbound half of a node: accept QUIC connections, accept
//! unidirectional streams, decode frame → envelope, dispatch.
//!
//! One stream carries exactly one frame; the sender closes its write side
//! so a read-to-EOF yields one complete message. Codec failures drop the
//! stream's data with a log line and leave the connection open for the
//! next stream.

use crate::registry::AddressRegistry;
use crate::router::Router;
use crate::tls::{self, TlsError};
use envelop_core::frame::{FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD};
use envelop_core::{Envelope, Frame, PeerId};
use quinn::{Connection, Endpoint, RecvStream};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Largest wire message a stream may carry.
const MAX_WIRE_LEN: usize = FRAME_HEADER_LEN + MAX_FRAME_PAYLOAD;

type RegisterPeerFn = Box<dyn Fn(PeerId, String) + Send + Sync>;
type ObserveFn = Box<dyn Fn(PeerId, &Envelope) + Send + Sync>;

/// Errors bringing up the listener.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("listen failed: {0}")]
    Listen(#[from] std::io::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Network-facing node: owns the listener, decodes inbound traffic, and
/// hands envelopes to the router. It never interprets inner payloads.
pub struct Node {
    name: String,
    endpoint: Endpoint,
    router: Arc<Router>,
    registry: Arc<AddressRegistry>,
    /// Called for REGISTER envelopes with the observed remote address.
    on_register_peer: OnceLock<RegisterPeerFn>,
    /// Called for every routed envelope with the attributed source peer
    /// (zero when the remote address is unknown). Route learning hangs
    /// off this hook.
    on_envelope: OnceLock<ObserveFn>,
}

impl Node {
    /// Bind the QUIC listener. Must run inside a tokio runtime.
    pub fn bind(
        name: &str,
        listen: SocketAddr,
        router: Arc<Router>,
        registry: Arc<AddressRegistry>,
    ) -> Result<Self, NodeError> {
        let endpoint = Endpoint::server(tls::server_config()?, listen)?;
        Ok(Self {
            name: name.to_string(),
            endpoint,
            router,
            registry,
            on_register_peer: OnceLock::new(),
            on_envelope: OnceLock::new(),
        })
    }

    /// The actually bound listen address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    pub fn set_on_register_peer(&self, f: impl Fn(PeerId, String) + Send + Sync + 'static) {
        let _ = self.on_register_peer.set(Box::new(f));
    }

    pub fn set_on_envelope(&self, f: impl Fn(PeerId, &Envelope) + Send + Sync + 'static) {
        let _ = self.on_envelope.set(Box::new(f));
    }

    /// Accept loop. Returns when the endpoint is closed.
    pub async fn run(self: Arc<Self>) {
        info!(node = %self.name, addr = ?self.endpoint.local_addr().ok(), "listening");

        while let Some(incoming) = self.endpoint.accept().await {
            let node = self.clone();
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => node.handle_conn(conn).await,
                    Err(e) => warn!(node = %node.name, error = %e, "handshake failed"),
                }
            });
        }

        info!(node = %self.name, "listener closed");
    }

    /// One connection carries many unidirectional streams, each its own
    /// message.
    async fn handle_conn(self: Arc<Self>, conn: Connection) {
        let remote = conn.remote_address();
        debug!(node = %self.name, %remote, "connection accepted");

        loop {
            match conn.accept_uni().await {
                Ok(stream) => {
                    let node = self.clone();
                    tokio::spawn(async move { node.handle_stream(stream, remote).await });
                }
                Err(e) => {
                    debug!(node = %self.name, %remote, reason = %e, "connection done");
                    return;
                }
            }
        }
    }

    async fn handle_stream(&self, mut stream: RecvStream, remote: SocketAddr) {
        let data = match stream.read_to_end(MAX_WIRE_LEN).await {
            Ok(data) => data,
            Err(e) => {
                warn!(node = %self.name, %remote, error = %e, "stream read failed");
                return;
            }
        };

        let frame = match Frame::decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(node = %self.name, %remote, error = %e, "frame decode failed");
                return;
            }
        };

        let env = match Envelope::unmarshal(&frame.payload) {
            Ok(env) => env,
            Err(e) => {
                warn!(node = %self.name, %remote, error = %e, "envelope decode failed");
                return;
            }
        };

        self.dispatch(env, remote);
    }

    /// Control handling, source attribution, then the router.
    fn dispatch(&self, env: Envelope, remote: SocketAddr) {
        let remote_addr = remote.to_string();

        // REGISTER binds the sender's claimed identity to the address we
        // actually observed. Control traffic never routes.
        if env.is_register() {
            debug!(node = %self.name, peer = %env.return_peer_id, addr = %remote_addr, "register");
            if let Some(on_register_peer) = self.on_register_peer.get() {
                on_register_peer(env.return_peer_id, remote_addr);
            }
            return;
        }

        let from = self
            .registry
            .peer_by_addr(&remote_addr)
            .unwrap_or(PeerId::ZERO);

        if let Some(on_envelope) = self.on_envelope.get() {
            on_envelope(from, &env);
        }

        self.router.handle_envelope(env);
    }

    /// Stop accepting; in-flight streams are aborted with the connection.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
    }
}

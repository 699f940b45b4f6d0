//! Outbound delivery: "get this envelope to that peer".
//!
//! The peer manager owns a client QUIC endpoint and a connection pool
//! keyed by address. For each send it resolves the peer's candidate
//! addresses (dial fallback order), reuses or dials a connection, opens a
//! fresh unidirectional stream, writes one frame, and closes the write
//! side so the receiver's read-to-EOF completes. It never parses
//! envelopes; it only wraps their bytes.

use crate::tls::{self, TlsError, SERVER_NAME};
use envelop_core::{Envelope, FrameError, PeerId};
use parking_lot::Mutex;
use quinn::{Connection, Endpoint};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, warn};

/// Resolves a peer to its candidate addresses, best first. Usually wired
/// to [`AddressRegistry::resolve`](crate::registry::AddressRegistry::resolve).
pub type Resolver = Box<dyn Fn(PeerId) -> Vec<String> + Send + Sync>;

/// Errors delivering an envelope to a peer.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no address for peer {0}")]
    NoAddress(PeerId),
    #[error("dial {addr} failed: {reason}")]
    Dial { addr: String, reason: String },
    #[error("open stream to {addr} failed: {reason}")]
    StreamOpen { addr: String, reason: String },
    #[error("write frame to {addr} failed: {reason}")]
    StreamWrite { addr: String, reason: String },
    #[error("close stream to {addr} failed: {reason}")]
    StreamClose { addr: String, reason: String },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Errors constructing the peer manager.
#[derive(Debug, thiserror::Error)]
pub enum PeerManagerError {
    #[error("endpoint bind failed: {0}")]
    Bind(#[from] std::io::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Connection pool plus dial logic for the outbound path.
pub struct PeerManager {
    endpoint: Endpoint,
    conns: Mutex<HashMap<String, Connection>>,
    resolve: Resolver,
}

impl PeerManager {
    /// Create a manager with its own client endpoint on an ephemeral UDP
    /// port. Must run inside a tokio runtime.
    pub fn new(resolve: Resolver) -> Result<Self, PeerManagerError> {
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let mut endpoint = Endpoint::client(bind)?;
        endpoint.set_default_client_config(tls::client_config()?);
        Ok(Self {
            endpoint,
            conns: Mutex::new(HashMap::new()),
            resolve,
        })
    }

    /// Reuse a live pooled connection to `addr` or dial a new one.
    ///
    /// The pool lock is never held across the dial; when two tasks race,
    /// the loser yields to whichever connection landed in the pool first.
    async fn get_conn(&self, addr: &str) -> Result<Connection, SendError> {
        if let Some(conn) = self.conns.lock().get(addr) {
            if conn.close_reason().is_none() {
                return Ok(conn.clone());
            }
        }

        let remote: SocketAddr = addr.parse().map_err(|e| SendError::Dial {
            addr: addr.to_string(),
            reason: format!("bad address: {e}"),
        })?;

        let connecting = self
            .endpoint
            .connect(remote, SERVER_NAME)
            .map_err(|e| SendError::Dial {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        let conn = connecting.await.map_err(|e| SendError::Dial {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        let mut pool = self.conns.lock();
        if let Some(existing) = pool.get(addr) {
            if existing.close_reason().is_none() {
                // Another task dialed first; keep the earlier connection.
                return Ok(existing.clone());
            }
        }
        pool.insert(addr.to_string(), conn.clone());
        Ok(conn)
    }

    /// Deliver one envelope to any of the peer's addresses, trying them in
    /// priority order. Only the last failure is surfaced.
    pub async fn send_to_peer(&self, id: PeerId, env: &Envelope) -> Result<(), SendError> {
        let addrs = (self.resolve)(id);
        if addrs.is_empty() {
            return Err(SendError::NoAddress(id));
        }

        let raw = env.to_frame().encode()?;
        let mut last_err = None;

        for addr in &addrs {
            match self.send_via(addr, &raw).await {
                Ok(()) => {
                    debug!(peer = %id, %addr, bytes = raw.len(), "envelope sent");
                    return Ok(());
                }
                Err(e) => {
                    warn!(peer = %id, %addr, error = %e, "send attempt failed");
                    last_err = Some(e);
                }
            }
        }

        // addrs was non-empty, so at least one attempt recorded an error.
        Err(last_err.unwrap_or(SendError::NoAddress(id)))
    }

    async fn send_via(&self, addr: &str, raw: &[u8]) -> Result<(), SendError> {
        let conn = self.get_conn(addr).await?;

        let mut stream = conn.open_uni().await.map_err(|e| {
            // A connection that cannot open streams is not worth pooling.
            self.conns.lock().remove(addr);
            SendError::StreamOpen {
                addr: addr.to_string(),
                reason: e.to_string(),
            }
        })?;

        stream
            .write_all(raw)
            .await
            .map_err(|e| SendError::StreamWrite {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        // Close our write side so the peer's read-to-EOF returns.
        stream.finish().map_err(|e| SendError::StreamClose {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    /// Close the client endpoint and every pooled connection.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
        self.conns.lock().clear();
    }
}

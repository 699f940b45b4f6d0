//! Request/response RPC over the envelope socket.
//!
//! An RPC message is JSON carried as an envelope inner payload with the
//! RPC flag set; the routing core treats it as opaque bytes. Requests
//! carry a method name and data, responses echo the request id with data
//! or an error string. Request ids are per-client atomic counters, not
//! process-global state.

use crate::socket::{EnvelopeSender, SocketError};
use envelop_core::envelope::FLAG_RPC;
use envelop_core::{Envelope, EnvelopeBuilder, PeerId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// TTL for RPC envelopes: generous enough for relayed paths.
const RPC_TTL: u8 = 10;

/// Message type tags.
pub const TYPE_REQUEST: u8 = 1;
pub const TYPE_RESPONSE: u8 = 2;

/// One RPC message, request or response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(rename = "t")]
    pub kind: u8,
    pub id: u64,
    #[serde(rename = "m", default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(rename = "d", default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(rename = "e", default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl RpcMessage {
    pub fn request(id: u64, method: &str, data: Vec<u8>) -> Self {
        Self {
            kind: TYPE_REQUEST,
            id,
            method: method.to_string(),
            data,
            error: String::new(),
        }
    }

    pub fn response(id: u64, data: Vec<u8>, error: String) -> Self {
        Self {
            kind: TYPE_RESPONSE,
            id,
            method: String::new(),
            data,
            error,
        }
    }
}

/// RPC failure surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("rpc encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Send(#[from] SocketError),
    #[error("rpc call timed out")]
    Timeout,
    #[error("remote error: {0}")]
    Remote(String),
}

/// A registered method: bytes in, bytes or error string out.
pub type Handler = Box<dyn Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync>;

/// Method registry for the serving side.
#[derive(Default)]
pub struct RpcServer {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl RpcServer {
    pub fn register(&self, method: &str, handler: Handler) {
        self.handlers.write().insert(method.to_string(), handler);
    }

    /// Run a request through its handler, producing the response message.
    pub fn handle(&self, msg: &RpcMessage) -> RpcMessage {
        if msg.kind != TYPE_REQUEST {
            return RpcMessage::response(msg.id, Vec::new(), "not a request".to_string());
        }

        let handlers = self.handlers.read();
        let Some(handler) = handlers.get(&msg.method) else {
            return RpcMessage::response(
                msg.id,
                Vec::new(),
                format!("method not found: {}", msg.method),
            );
        };

        match handler(&msg.data) {
            Ok(data) => RpcMessage::response(msg.id, data, String::new()),
            Err(e) => RpcMessage::response(msg.id, Vec::new(), e),
        }
    }
}

/// Pending-call table for the calling side.
#[derive(Default)]
struct RpcClient {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcMessage>>>,
}

impl RpcClient {
    fn next_request(&self) -> (u64, oneshot::Receiver<RpcMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        (id, rx)
    }

    fn forget(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    /// Wake the caller waiting on this response id, if any.
    fn complete(&self, msg: RpcMessage) {
        if let Some(tx) = self.pending.lock().remove(&msg.id) {
            let _ = tx.send(msg);
        } else {
            debug!(id = msg.id, "response for unknown request");
        }
    }
}

/// Client and server halves bridged onto one socket's send path.
pub struct RpcEndpoint {
    self_id: PeerId,
    sender: Arc<dyn EnvelopeSender>,
    client: RpcClient,
    server: RpcServer,
}

impl RpcEndpoint {
    pub fn new(self_id: PeerId, sender: Arc<dyn EnvelopeSender>) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            sender,
            client: RpcClient::default(),
            server: RpcServer::default(),
        })
    }

    /// Register a served method.
    pub fn register(&self, method: &str, handler: Handler) {
        self.server.register(method, handler);
    }

    /// Call `method` on `dest` and await the response or a timeout.
    pub async fn call(
        &self,
        dest: PeerId,
        method: &str,
        data: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RpcError> {
        let (id, rx) = self.client.next_request();
        let msg = RpcMessage::request(id, method, data);

        let env = match self.envelope_for(dest, &msg) {
            Ok(env) => env,
            Err(e) => {
                self.client.forget(id);
                return Err(e);
            }
        };
        if let Err(e) = self.sender.send_envelope(env).await {
            self.client.forget(id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) if resp.error.is_empty() => Ok(resp.data),
            Ok(Ok(resp)) => Err(RpcError::Remote(resp.error)),
            // Sender half dropped or clock ran out: either way, no answer.
            Ok(Err(_)) | Err(_) => {
                self.client.forget(id);
                Err(RpcError::Timeout)
            }
        }
    }

    fn envelope_for(&self, dest: PeerId, msg: &RpcMessage) -> Result<Envelope, RpcError> {
        let payload = serde_json::to_vec(msg)?;
        Ok(EnvelopeBuilder::new()
            .flags(FLAG_RPC)
            .ttl(RPC_TTL)
            .dest(dest)
            .return_peer(self.self_id)
            .payload(payload)
            .build())
    }

    /// Entry point from the socket for RPC-flagged envelopes.
    pub fn dispatch(self: &Arc<Self>, env: Envelope) {
        let msg: RpcMessage = match serde_json::from_slice(&env.inner_payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "undecodable rpc payload");
                return;
            }
        };

        match msg.kind {
            TYPE_REQUEST => {
                let resp = self.server.handle(&msg);
                let reply_to = env.return_peer_id;
                let endpoint = self.clone();
                tokio::spawn(async move {
                    match endpoint.envelope_for(reply_to, &resp) {
                        Ok(reply) => {
                            if let Err(e) = endpoint.sender.send_envelope(reply).await {
                                warn!(error = %e, "rpc response send failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "rpc response encode failed"),
                    }
                });
            }
            TYPE_RESPONSE => self.client.complete(msg),
            other => warn!(kind = other, "unknown rpc message kind"),
        }
    }
}

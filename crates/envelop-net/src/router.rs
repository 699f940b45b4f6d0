//! The router: per-envelope state machine.
//!
//! The router speaks only PeerId and Envelope; transport and route policy
//! are injected as callbacks at startup. For each envelope it decides one
//! of: REGISTER control handling, TTL drop, forward to a next hop, peel a
//! nested layer, or deliver application bytes.
//!
//! Guard order matters and is fixed: REGISTER first (control envelopes
//! never route), then the TTL gate, then the destination check.

use envelop_core::{Envelope, PeerId};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Layer-peel limit. Each nesting level costs 72 header bytes on the
/// wire, so real traffic stays far below this.
pub const MAX_UNWRAP_DEPTH: usize = 16;

type NextHopFn = Box<dyn Fn(PeerId) -> Option<PeerId> + Send + Sync>;
type SendFn = Box<dyn Fn(PeerId, Envelope) + Send + Sync>;
type PayloadFn = Box<dyn Fn(Envelope) + Send + Sync>;
type RegisterFn = Box<dyn Fn(PeerId) + Send + Sync>;

/// Envelope state machine with injected capabilities. All callbacks are
/// wired once at node build time and read-only afterwards.
pub struct Router {
    self_id: PeerId,
    next_hop: OnceLock<NextHopFn>,
    send: OnceLock<SendFn>,
    on_payload: OnceLock<PayloadFn>,
    on_register: OnceLock<RegisterFn>,
}

impl Router {
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            next_hop: OnceLock::new(),
            send: OnceLock::new(),
            on_payload: OnceLock::new(),
            on_register: OnceLock::new(),
        }
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    /// Wire the next-hop resolver (typically `RouteTable::lookup`).
    pub fn set_next_hop(&self, f: impl Fn(PeerId) -> Option<PeerId> + Send + Sync + 'static) {
        let _ = self.next_hop.set(Box::new(f));
    }

    /// Wire the forward path (typically a spawn onto
    /// `PeerManager::send_to_peer`). Fire-and-forget: forward errors are
    /// logged by the callback, never propagated back into routing.
    pub fn set_send(&self, f: impl Fn(PeerId, Envelope) + Send + Sync + 'static) {
        let _ = self.send.set(Box::new(f));
    }

    /// Wire the delivery sink for final application envelopes.
    pub fn set_on_payload(&self, f: impl Fn(Envelope) + Send + Sync + 'static) {
        let _ = self.on_payload.set(Box::new(f));
    }

    /// Wire the REGISTER observer.
    pub fn set_on_register(&self, f: impl Fn(PeerId) + Send + Sync + 'static) {
        let _ = self.on_register.set(Box::new(f));
    }

    /// Resolve the next hop for a destination, if the resolver knows one.
    pub fn next_hop(&self, dest: PeerId) -> Option<PeerId> {
        self.next_hop.get().and_then(|f| f(dest))
    }

    /// Run one envelope through the state machine.
    ///
    /// Nested layers are peeled iteratively rather than by recursion; the
    /// inner envelope carries its own TTL, so unwrapping does not
    /// decrement anything.
    pub fn handle_envelope(&self, env: Envelope) {
        let mut env = env;

        for _ in 0..MAX_UNWRAP_DEPTH {
            // REGISTER is control traffic: observe and stop.
            if env.is_register() {
                if let Some(on_register) = self.on_register.get() {
                    debug!(from = %env.return_peer_id, "register envelope");
                    on_register(env.return_peer_id);
                }
                return;
            }

            if env.ttl == 0 {
                debug!(dest = %env.dest_peer_id, "ttl expired, dropping");
                return;
            }

            // Not ours: forward toward the destination.
            if env.dest_peer_id != self.self_id {
                let Some(next_hop) = self.next_hop(env.dest_peer_id) else {
                    debug!(dest = %env.dest_peer_id, "no next hop, dropping");
                    return;
                };
                let Some(send) = self.send.get() else {
                    warn!("no send path wired, dropping");
                    return;
                };
                env.ttl -= 1;
                debug!(dest = %env.dest_peer_id, next = %next_hop, ttl = env.ttl, "forwarding");
                send(next_hop, env);
                return;
            }

            // Ours, but empty: delivered, nothing to do.
            if env.inner_len == 0 || env.inner_payload.is_empty() {
                debug!("empty envelope");
                return;
            }

            // A nested envelope means one more onion layer to peel.
            match Envelope::unmarshal(&env.inner_payload) {
                Ok(inner) => {
                    debug!("peeling nested envelope");
                    env = inner;
                }
                Err(_) => {
                    if let Some(on_payload) = self.on_payload.get() {
                        on_payload(env);
                    }
                    return;
                }
            }
        }

        warn!("unwrap depth exceeded, dropping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envelop_core::envelope::{EnvelopeBuilder, FLAG_ENCRYPTED, FLAG_REGISTER};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn peer(b: u8) -> PeerId {
        PeerId([b; 32])
    }

    struct Capture {
        forwards: Mutex<Vec<(PeerId, Envelope)>>,
        payloads: Mutex<Vec<Envelope>>,
        registers: Mutex<Vec<PeerId>>,
    }

    fn wired_router(self_id: PeerId) -> (Arc<Router>, Arc<Capture>) {
        let cap = Arc::new(Capture {
            forwards: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
            registers: Mutex::new(Vec::new()),
        });
        let router = Arc::new(Router::new(self_id));

        // Every destination is reachable directly.
        router.set_next_hop(|dest| Some(dest));
        let c = cap.clone();
        router.set_send(move |next, env| c.forwards.lock().push((next, env)));
        let c = cap.clone();
        router.set_on_payload(move |env| c.payloads.lock().push(env));
        let c = cap.clone();
        router.set_on_register(move |id| c.registers.lock().push(id));

        (router, cap)
    }

    fn envelope(dest: PeerId, ret: PeerId, ttl: u8, payload: &[u8]) -> Envelope {
        EnvelopeBuilder::new()
            .ttl(ttl)
            .dest(dest)
            .return_peer(ret)
            .payload(payload.to_vec())
            .build()
    }

    #[test]
    fn test_register_never_forwards() {
        let (router, cap) = wired_router(peer(1));
        let mut env = envelope(peer(2), peer(3), 5, b"");
        env.flags = FLAG_REGISTER;

        router.handle_envelope(env);
        assert_eq!(cap.registers.lock().as_slice(), &[peer(3)]);
        assert!(cap.forwards.lock().is_empty());
        assert!(cap.payloads.lock().is_empty());
    }

    #[test]
    fn test_register_is_a_bit_test_not_byte_equality() {
        // An encrypted envelope has flags == 0x01; under the old
        // whole-byte comparison it would be mistaken for REGISTER.
        let (router, cap) = wired_router(peer(1));
        let mut env = envelope(peer(2), peer(3), 5, b"x");
        env.flags = FLAG_ENCRYPTED;

        router.handle_envelope(env);
        assert!(cap.registers.lock().is_empty());
        assert_eq!(cap.forwards.lock().len(), 1);
    }

    #[test]
    fn test_ttl_zero_drops_before_dest_check() {
        let (router, cap) = wired_router(peer(1));

        // Even an envelope addressed to us is dropped at ttl 0.
        router.handle_envelope(envelope(peer(1), peer(3), 0, b"late"));
        assert!(cap.payloads.lock().is_empty());
        assert!(cap.forwards.lock().is_empty());
    }

    #[test]
    fn test_forward_decrements_ttl() {
        let (router, cap) = wired_router(peer(1));
        router.handle_envelope(envelope(peer(2), peer(3), 5, b"data"));

        let forwards = cap.forwards.lock();
        let (next, env) = &forwards[0];
        assert_eq!(*next, peer(2));
        assert_eq!(env.ttl, 4);
    }

    #[test]
    fn test_forward_from_ttl_one_happens_once() {
        // The hop holding ttl=1 still forwards (with ttl 0); the receiver
        // drops at entry.
        let (router, cap) = wired_router(peer(1));
        router.handle_envelope(envelope(peer(2), peer(3), 1, b"edge"));

        let forwarded = { cap.forwards.lock().remove(0) };
        assert_eq!(forwarded.1.ttl, 0);

        let (receiver, rcap) = wired_router(peer(2));
        receiver.handle_envelope(forwarded.1);
        assert!(rcap.payloads.lock().is_empty());
        assert!(rcap.forwards.lock().is_empty());
    }

    #[test]
    fn test_no_next_hop_drops() {
        let cap = Arc::new(Capture {
            forwards: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
            registers: Mutex::new(Vec::new()),
        });
        let router = Router::new(peer(1));
        router.set_next_hop(|_| None);
        let c = cap.clone();
        router.set_send(move |next, env| c.forwards.lock().push((next, env)));

        router.handle_envelope(envelope(peer(2), peer(3), 5, b"x"));
        assert!(cap.forwards.lock().is_empty());
    }

    #[test]
    fn test_dest_self_never_forwards() {
        let (router, cap) = wired_router(peer(1));
        router.handle_envelope(envelope(peer(1), peer(3), 5, b"mine"));

        assert!(cap.forwards.lock().is_empty());
        let payloads = cap.payloads.lock();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].inner_payload, b"mine");
    }

    #[test]
    fn test_empty_envelope_is_a_noop() {
        let (router, cap) = wired_router(peer(1));
        router.handle_envelope(envelope(peer(1), peer(3), 5, b""));
        assert!(cap.payloads.lock().is_empty());
        assert!(cap.forwards.lock().is_empty());
    }

    #[test]
    fn test_nested_unwrap_keeps_inner_ttl() {
        let (router, cap) = wired_router(peer(1));

        // Inner addressed elsewhere with its own ttl; outer addressed to
        // us. Unwrap must not touch the inner ttl before forwarding
        // decrements it.
        let inner = envelope(peer(2), peer(3), 7, b"deep");
        let outer = EnvelopeBuilder::new()
            .ttl(5)
            .dest(peer(1))
            .return_peer(peer(3))
            .payload(inner.marshal())
            .build();

        router.handle_envelope(outer);
        let forwards = cap.forwards.lock();
        assert_eq!(forwards[0].0, peer(2));
        assert_eq!(forwards[0].1.ttl, 6);
    }

    #[test]
    fn test_nested_unwrap_to_local_payload() {
        let (router, cap) = wired_router(peer(1));

        let inner = envelope(peer(1), peer(3), 5, b"for me");
        let outer = EnvelopeBuilder::new()
            .ttl(5)
            .dest(peer(1))
            .return_peer(peer(3))
            .payload(inner.marshal())
            .build();

        router.handle_envelope(outer);
        assert_eq!(cap.payloads.lock()[0].inner_payload, b"for me");
    }

    #[test]
    fn test_unwrap_depth_cap() {
        let (router, cap) = wired_router(peer(1));

        let mut env = envelope(peer(1), peer(3), 5, b"core");
        for _ in 0..MAX_UNWRAP_DEPTH + 2 {
            env = EnvelopeBuilder::new()
                .ttl(5)
                .dest(peer(1))
                .return_peer(peer(3))
                .payload(env.marshal())
                .build();
        }

        router.handle_envelope(env);
        assert!(cap.payloads.lock().is_empty());
    }
}

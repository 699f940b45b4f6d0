//! Envelope strategies: how outgoing envelopes are built and how incoming
//! layers are interpreted.
//!
//! The routing core only moves envelopes; a strategy decides the shape of
//! the stack — one plain layer, one encrypted layer, or an onion of nested
//! layers each addressed to a relay. On the receive side the strategy
//! inspects a layer already addressed to us and says whether it carries
//! final application bytes or another envelope for the router.

use crate::crypto::{decrypt_inner, encrypt_inner, CryptoError};
use crate::envelope::{Envelope, EnvelopeBuilder, ENV_VERSION};
use crate::peer::PeerId;
use thiserror::Error;

/// TTL used when a strategy does not specify one.
pub const DEFAULT_TTL: u8 = 5;

/// Strategy errors.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Sealing or opening an inner payload failed.
    #[error("inner payload crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// The intent behind one send: who is sending what to whom.
#[derive(Clone, Debug)]
pub struct SendContext {
    pub from: PeerId,
    pub to: PeerId,
    pub payload: Vec<u8>,
}

/// Outcome of interpreting an incoming layer addressed to us.
#[derive(Debug)]
pub enum Incoming {
    /// Final application data; deliver to the socket.
    Business(Envelope),
    /// A nested envelope peeled off this layer; re-inject into the router.
    Inner(Envelope),
}

/// Pluggable policy for building outgoing envelopes and interpreting
/// incoming ones. The router stays in charge of dest/TTL/forwarding; a
/// strategy only decides what one layer means.
pub trait EnvelopeStrategy: Send + Sync {
    /// Construct the outermost envelope to send for `ctx`.
    fn build_outgoing(&self, ctx: SendContext) -> Result<Envelope, StrategyError>;

    /// Interpret an envelope that has arrived addressed to us.
    fn handle_incoming(&self, env: Envelope) -> Result<Incoming, StrategyError>;
}

/// One layer, optional symmetric encryption of the inner payload.
///
/// The usual peer-to-peer case: header in the clear, payload either plain
/// or sealed end to end with a pre-shared key.
pub struct SimpleStrategy {
    key: Option<Vec<u8>>,
    default_ttl: u8,
}

impl SimpleStrategy {
    /// `key`: `None` for plaintext, or a 16/24/32-byte AES key.
    /// `default_ttl`: 0 falls back to [`DEFAULT_TTL`].
    pub fn new(key: Option<Vec<u8>>, default_ttl: u8) -> Self {
        Self {
            key,
            default_ttl: if default_ttl == 0 { DEFAULT_TTL } else { default_ttl },
        }
    }

    /// Plaintext strategy with the default TTL.
    pub fn plaintext() -> Self {
        Self::new(None, DEFAULT_TTL)
    }
}

impl EnvelopeStrategy for SimpleStrategy {
    fn build_outgoing(&self, ctx: SendContext) -> Result<Envelope, StrategyError> {
        let mut env = EnvelopeBuilder::new()
            .version(ENV_VERSION)
            .ttl(self.default_ttl)
            .dest(ctx.to)
            .return_peer(ctx.from)
            .payload(ctx.payload)
            .build();

        if let Some(key) = &self.key {
            encrypt_inner(&mut env, key)?;
        }
        Ok(env)
    }

    fn handle_incoming(&self, mut env: Envelope) -> Result<Incoming, StrategyError> {
        if env.is_encrypted() {
            if let Some(key) = &self.key {
                decrypt_inner(&mut env, key)?;
            }
        }
        // One layer is the business layer.
        Ok(Incoming::Business(env))
    }
}

/// One hop of an onion path.
#[derive(Clone)]
pub struct OnionLayer {
    /// The relay this layer is addressed to.
    pub dest: PeerId,
    /// Key sealing this layer's inner payload, if any.
    pub key: Option<Vec<u8>>,
}

impl OnionLayer {
    pub fn new(dest: PeerId) -> Self {
        Self { dest, key: None }
    }

    pub fn with_key(dest: PeerId, key: Vec<u8>) -> Self {
        Self { dest, key: Some(key) }
    }
}

/// Nested envelopes: each relay peels exactly one layer and forwards the
/// next, blind to everything past its own hop.
///
/// Outgoing, for `layers = [R1, R2, ..., Rk]` and final destination `D`:
/// the innermost envelope is `(dest = D, return = from, inner = payload)`,
/// then each wrap from `Rk` down to `R1` marshals the previous envelope
/// into the inner payload of a new one addressed to the relay. The
/// outermost envelope is addressed to `R1`. `return_peer_id` carries the
/// original sender at every layer, so the final recipient still learns who
/// wrote to it.
pub struct OnionStrategy {
    layers: Vec<OnionLayer>,
    hop_key: Option<Vec<u8>>,
}

impl OnionStrategy {
    /// Sender-side strategy over the given relay path.
    pub fn new(layers: Vec<OnionLayer>) -> Self {
        Self { layers, hop_key: None }
    }

    /// Relay-side strategy: no path, just this hop's unwrap key.
    pub fn hop(key: Option<Vec<u8>>) -> Self {
        Self { layers: Vec::new(), hop_key: key }
    }
}

impl EnvelopeStrategy for OnionStrategy {
    fn build_outgoing(&self, ctx: SendContext) -> Result<Envelope, StrategyError> {
        let mut current = EnvelopeBuilder::new()
            .version(ENV_VERSION)
            .ttl(DEFAULT_TTL)
            .dest(ctx.to)
            .return_peer(ctx.from)
            .payload(ctx.payload)
            .build();

        // Wrap inside-out: the last relay sees the innermost wrap.
        for layer in self.layers.iter().rev() {
            let mut outer = EnvelopeBuilder::new()
                .version(ENV_VERSION)
                .ttl(DEFAULT_TTL)
                .dest(layer.dest)
                .return_peer(ctx.from)
                .payload(current.marshal())
                .build();
            if let Some(key) = &layer.key {
                encrypt_inner(&mut outer, key)?;
            }
            current = outer;
        }

        Ok(current)
    }

    fn handle_incoming(&self, mut env: Envelope) -> Result<Incoming, StrategyError> {
        if env.is_encrypted() {
            if let Some(key) = &self.hop_key {
                decrypt_inner(&mut env, key)?;
            }
        }

        // If the inner bytes parse as an envelope there is another layer
        // to route; otherwise the application data has surfaced.
        match Envelope::unmarshal(&env.inner_payload) {
            Ok(inner) => Ok(Incoming::Inner(inner)),
            Err(_) => Ok(Incoming::Business(env)),
        }
    }
}

//! Core protocol types for the envelop overlay.
//!
//! This crate is transport-free: it defines the byte-exact wire formats
//! (frame and envelope), peer identity and its text encoding, the
//! inner-payload AEAD, and the envelope construction strategies. The
//! networking runtime lives in `envelop-net`.

pub mod crypto;
pub mod envelope;
pub mod frame;
pub mod peer;
pub mod strategy;

pub use crypto::{decrypt_inner, encrypt_inner, CryptoError};
pub use envelope::{Envelope, EnvelopeBuilder, EnvelopeError};
pub use frame::{Frame, FrameError, FrameType};
pub use peer::{KeyPair, PeerId, PeerIdError};
pub use strategy::{
    EnvelopeStrategy, Incoming, OnionLayer, OnionStrategy, SendContext, SimpleStrategy,
    StrategyError,
};

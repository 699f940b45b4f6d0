//! Peer identity and the domain-form text encoding.
//!
//! A peer is identified by the SHA-256 of its long-lived Ed25519 public
//! key. The all-zero ID is reserved as "unset". The text form is lowercase
//! RFC 4648 base32 without padding, optionally suffixed `.env`.

use data_encoding::BASE32_NOPAD;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Fixed length of a peer identifier in bytes.
pub const PEER_ID_LEN: usize = 32;

/// Suffix carried by the domain form of a peer ID.
pub const DOMAIN_SUFFIX: &str = ".env";

/// Errors decoding the text form of a peer ID.
#[derive(Debug, Error)]
pub enum PeerIdError {
    /// Input did not decode to exactly [`PEER_ID_LEN`] bytes.
    #[error("peer id must be exactly {PEER_ID_LEN} bytes")]
    Length,
    /// Input was not valid base32.
    #[error("invalid base32: {0}")]
    Encoding(#[from] data_encoding::DecodeError),
}

/// Unique peer identifier (hash of the peer's public key).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; PEER_ID_LEN]);

impl PeerId {
    /// The reserved all-zero "unset" ID.
    pub const ZERO: PeerId = PeerId([0u8; PEER_ID_LEN]);

    /// Derive a peer ID from a public key: `SHA-256(public_key)`.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = Sha256::digest(public_key);
        let mut id = [0u8; PEER_ID_LEN];
        id.copy_from_slice(&digest);
        Self(id)
    }

    /// True if this is the reserved all-zero ID.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Raw bytes of the ID.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// Encode to the domain form: lowercase base32, `.env` suffix.
    pub fn to_domain(&self) -> String {
        let mut s = BASE32_NOPAD.encode(&self.0).to_lowercase();
        s.push_str(DOMAIN_SUFFIX);
        s
    }

    /// Decode the domain form back to an ID.
    ///
    /// The `.env` suffix is optional; the input is uppercased before the
    /// base32 decode (the wire alphabet is the RFC 4648 uppercase one).
    pub fn from_domain(domain: &str) -> Result<Self, PeerIdError> {
        let stripped = domain.strip_suffix(DOMAIN_SUFFIX).unwrap_or(domain);
        let decoded = BASE32_NOPAD.decode(stripped.to_uppercase().as_bytes())?;
        if decoded.len() != PEER_ID_LEN {
            return Err(PeerIdError::Length);
        }
        let mut id = [0u8; PEER_ID_LEN];
        id.copy_from_slice(&decoded);
        Ok(Self(id))
    }

    /// XOR distance to another ID, as raw bytes. Byte arrays compare
    /// big-endian, so `Ord` on the result orders by proximity.
    pub fn xor_distance(&self, other: &PeerId) -> [u8; PEER_ID_LEN] {
        let mut out = [0u8; PEER_ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_domain())
    }
}

/// Node identity keypair. The public key determines the [`PeerId`];
/// signing is reserved for a future envelope-authentication extension.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    peer_id: PeerId,
}

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Build from seed bytes (deterministic, for tests).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let peer_id = PeerId::from_public_key(signing_key.verifying_key().as_bytes());
        Self { signing_key, peer_id }
    }

    /// The public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The peer ID derived from the public key at construction.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

//! The envelope: the protocol's per-hop routing unit.
//!
//! An envelope is a fixed 72-byte header plus an inner payload that is
//! either application bytes or another marshaled envelope (onion nesting).
//! The frame layer decides *how* a message travels; the envelope decides
//! *what* it means at the current hop.
//!
//! Wire layout (big-endian):
//!
//! ```text
//! off  size  field
//!  0    1    version
//!  1    1    flags
//!  2    1    ttl
//!  3   32    dest_peer_id
//! 35   32    return_peer_id
//! 67    2    inner_len
//! 69    3    reserved (zero on send, ignored on receive)
//! 72    N    inner_payload
//! ```

use crate::frame::{Frame, FrameType};
use crate::peer::PeerId;
use bytes::BufMut;
use thiserror::Error;

/// Fixed envelope header size.
pub const ENV_HEADER_LEN: usize = 72;

/// Current protocol version.
pub const ENV_VERSION: u8 = 1;

/// Inner payload is `nonce || ciphertext`.
pub const FLAG_ENCRYPTED: u8 = 1 << 0;
/// Inner payload is an RPC message (opaque to the routing core).
pub const FLAG_RPC: u8 = 1 << 2;
/// Control envelope registering `return_peer_id` at the observed source
/// address. Never routed.
pub const FLAG_REGISTER: u8 = 1 << 7;

/// Envelope codec errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Input shorter than the fixed header.
    #[error("envelope too short")]
    Short,
    /// Header declares more inner payload than the input carries.
    #[error("inner payload truncated")]
    Truncated,
}

/// One layer of envelope. May nest recursively via the inner payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub version: u8,
    pub flags: u8,
    pub ttl: u8,
    pub dest_peer_id: PeerId,
    pub return_peer_id: PeerId,
    pub inner_len: u16,
    pub reserved: [u8; 3],
    pub inner_payload: Vec<u8>,
}

impl Envelope {
    /// Replace the inner payload, keeping `inner_len` consistent.
    pub fn set_inner_payload(&mut self, payload: Vec<u8>) {
        self.inner_len = payload.len() as u16;
        self.inner_payload = payload;
    }

    /// True if the ENCRYPTED flag bit is set.
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// True if the RPC flag bit is set.
    pub fn is_rpc(&self) -> bool {
        self.flags & FLAG_RPC != 0
    }

    /// True if the REGISTER flag bit is set. Always a bit test; whole-byte
    /// comparison would confuse REGISTER with ENCRYPTED.
    pub fn is_register(&self) -> bool {
        self.flags & FLAG_REGISTER != 0
    }

    /// Serialize to wire bytes. Length is `72 + inner_len`.
    pub fn marshal(&self) -> Vec<u8> {
        debug_assert_eq!(self.inner_len as usize, self.inner_payload.len());
        let mut buf = Vec::with_capacity(ENV_HEADER_LEN + self.inner_payload.len());
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_u8(self.ttl);
        buf.put_slice(self.dest_peer_id.as_bytes());
        buf.put_slice(self.return_peer_id.as_bytes());
        buf.put_u16(self.inner_len);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.inner_payload);
        buf
    }

    /// Deserialize from wire bytes. Bytes beyond `72 + inner_len` are
    /// ignored (reserved for future padding).
    pub fn unmarshal(data: &[u8]) -> Result<Self, EnvelopeError> {
        if data.len() < ENV_HEADER_LEN {
            return Err(EnvelopeError::Short);
        }
        let inner_len = u16::from_be_bytes([data[67], data[68]]);
        if data.len() < ENV_HEADER_LEN + inner_len as usize {
            return Err(EnvelopeError::Truncated);
        }

        let mut dest = [0u8; 32];
        dest.copy_from_slice(&data[3..35]);
        let mut ret = [0u8; 32];
        ret.copy_from_slice(&data[35..67]);
        let mut reserved = [0u8; 3];
        reserved.copy_from_slice(&data[69..72]);

        Ok(Self {
            version: data[0],
            flags: data[1],
            ttl: data[2],
            dest_peer_id: PeerId(dest),
            return_peer_id: PeerId(ret),
            inner_len,
            reserved,
            inner_payload: data[ENV_HEADER_LEN..ENV_HEADER_LEN + inner_len as usize].to_vec(),
        })
    }

    /// Wrap the marshaled envelope in a `Normal` frame. Oversized
    /// payloads surface when the frame is encoded.
    pub fn to_frame(&self) -> Frame {
        Frame::new(FrameType::Normal, self.marshal())
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            version: ENV_VERSION,
            flags: 0,
            ttl: 0,
            dest_peer_id: PeerId::ZERO,
            return_peer_id: PeerId::ZERO,
            inner_len: 0,
            reserved: [0u8; 3],
            inner_payload: Vec::new(),
        }
    }
}

/// Chained builder for envelopes. `payload` keeps `inner_len` in sync.
#[derive(Default)]
pub struct EnvelopeBuilder {
    env: Envelope,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: u8) -> Self {
        self.env.version = version;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.env.flags = flags;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.env.ttl = ttl;
        self
    }

    pub fn dest(mut self, id: PeerId) -> Self {
        self.env.dest_peer_id = id;
        self
    }

    pub fn return_peer(mut self, id: PeerId) -> Self {
        self.env.return_peer_id = id;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.env.set_inner_payload(payload);
        self
    }

    pub fn build(self) -> Envelope {
        self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        EnvelopeBuilder::new()
            .version(1)
            .flags(0)
            .ttl(5)
            .dest(PeerId([0xaa; 32]))
            .return_peer(PeerId([0xbb; 32]))
            .payload(b"ping".to_vec())
            .build()
    }

    #[test]
    fn test_marshal_unmarshal_roundtrip() {
        let env = sample();
        let raw = env.marshal();
        assert_eq!(raw.len(), ENV_HEADER_LEN + env.inner_len as usize);
        assert_eq!(Envelope::unmarshal(&raw).unwrap(), env);
    }

    #[test]
    fn test_unmarshal_short() {
        let raw = [0u8; ENV_HEADER_LEN - 1];
        assert!(matches!(
            Envelope::unmarshal(&raw),
            Err(EnvelopeError::Short)
        ));
    }

    #[test]
    fn test_unmarshal_truncated() {
        let mut raw = sample().marshal();
        raw.truncate(raw.len() - 1);
        assert!(matches!(
            Envelope::unmarshal(&raw),
            Err(EnvelopeError::Truncated)
        ));
    }

    #[test]
    fn test_unmarshal_ignores_trailing_padding() {
        let env = sample();
        let mut raw = env.marshal();
        raw.extend_from_slice(&[0u8; 17]);
        assert_eq!(Envelope::unmarshal(&raw).unwrap(), env);
    }

    #[test]
    fn test_flag_bits() {
        let mut env = sample();
        env.flags = FLAG_ENCRYPTED;
        assert!(env.is_encrypted());
        assert!(!env.is_register());

        env.flags = FLAG_REGISTER | FLAG_RPC;
        assert!(env.is_register());
        assert!(env.is_rpc());
        assert!(!env.is_encrypted());
    }

    #[test]
    fn test_nested_envelope_roundtrip() {
        let inner = sample();
        let outer = EnvelopeBuilder::new()
            .ttl(5)
            .dest(PeerId([0xcc; 32]))
            .return_peer(PeerId([0xbb; 32]))
            .payload(inner.marshal())
            .build();

        let decoded = Envelope::unmarshal(&outer.marshal()).unwrap();
        let decoded_inner = Envelope::unmarshal(&decoded.inner_payload).unwrap();
        assert_eq!(decoded_inner, inner);
    }

    #[test]
    fn test_to_frame_carries_marshaled_bytes() {
        let env = sample();
        let frame = env.to_frame();
        assert_eq!(frame.frame_type, FrameType::Normal);
        assert_eq!(frame.payload, env.marshal());
    }
}

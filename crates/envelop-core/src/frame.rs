//! Message framing: a type/length-prefixed wrapper placing exactly one
//! marshaled envelope on exactly one transport stream.
//!
//! Wire format:
//!
//! ```text
//! +---------+-------------+---------------+
//! |  Type   |   Length    |    Payload    |
//! | (1 B)   | (2 B, BE)   |  (N bytes)    |
//! +---------+-------------+---------------+
//! ```
//!
//! The sender writes one frame and closes its write side; the receiver
//! reads to EOF and decodes once. The codec never reads multiple frames
//! from one buffer.

use bytes::BufMut;
use thiserror::Error;

/// Size of the frame header: 1 byte type + 2 bytes length.
pub const FRAME_HEADER_LEN: usize = 3;

/// Maximum frame payload, bounded by the u16 length field.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Input shorter than the frame header.
    #[error("frame too short")]
    Short,
    /// Declared length exceeds the bytes available.
    #[error("frame length mismatch")]
    LengthMismatch,
    /// Payload exceeds the u16 length field.
    #[error("frame payload too large: {0} bytes")]
    TooLarge(usize),
    /// Unrecognized frame type byte.
    #[error("unknown frame type: {0:#04x}")]
    UnknownType(u8),
}

/// Frame types. Only `Normal` is in use; fixed-size obfuscation and
/// fragmenting types are reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// A single variable-length envelope.
    Normal = 0x01,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Normal),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// One on-wire message: a typed wrapper around a marshaled envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self { frame_type, payload }
    }

    /// Encode to the raw bytes written to a stream.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(FrameError::TooLarge(self.payload.len()));
        }
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        out.put_u8(self.frame_type as u8);
        out.put_u16(self.payload.len() as u16);
        out.put_slice(&self.payload);
        Ok(out)
    }

    /// Decode one frame from a complete buffer. Bytes past the declared
    /// length are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Short);
        }
        let frame_type = FrameType::try_from(data[0])?;
        let length = u16::from_be_bytes([data[1], data[2]]) as usize;
        if data.len() < FRAME_HEADER_LEN + length {
            return Err(FrameError::LengthMismatch);
        }
        Ok(Self {
            frame_type,
            payload: data[FRAME_HEADER_LEN..FRAME_HEADER_LEN + length].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(FrameType::Normal, vec![1, 2, 3, 4, 5]);
        let raw = frame.encode().unwrap();
        assert_eq!(raw.len(), FRAME_HEADER_LEN + 5);
        assert_eq!(Frame::decode(&raw).unwrap(), frame);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let frame = Frame::new(FrameType::Normal, vec![]);
        let raw = frame.encode().unwrap();
        assert_eq!(Frame::decode(&raw).unwrap(), frame);
    }

    #[test]
    fn test_decode_short() {
        assert!(matches!(Frame::decode(&[0x01, 0x00]), Err(FrameError::Short)));
    }

    #[test]
    fn test_decode_length_mismatch() {
        // Declares 10 payload bytes, provides 2.
        let raw = [0x01, 0x00, 0x0a, 0xaa, 0xbb];
        assert!(matches!(
            Frame::decode(&raw),
            Err(FrameError::LengthMismatch)
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        let raw = [0x7f, 0x00, 0x00];
        assert!(matches!(
            Frame::decode(&raw),
            Err(FrameError::UnknownType(0x7f))
        ));
    }

    #[test]
    fn test_encode_too_large() {
        let frame = Frame::new(FrameType::Normal, vec![0u8; MAX_FRAME_PAYLOAD + 1]);
        assert!(matches!(frame.encode(), Err(FrameError::TooLarge(_))));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut raw = Frame::new(FrameType::Normal, vec![9, 9]).encode().unwrap();
        raw.extend_from_slice(&[0, 0, 0, 0]);
        let decoded = Frame::decode(&raw).unwrap();
        assert_eq!(decoded.payload, vec![9, 9]);
    }
}

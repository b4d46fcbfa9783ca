//! Physical frame layout
//!
//! `[type:1][hop:1][nonce:12][ciphertext:N][tag:4]` — 18 bytes of fixed
//! overhead. Ciphertext length equals plaintext length (stream AEAD), so
//! the payload size is recoverable from the frame size alone.

use bytes::{BufMut, BytesMut};

use fern_core::{DeviceId, MeshError, MeshResult};

use crate::PacketType;

/// AEAD nonce size.
pub const NONCE_SIZE: usize = 12;

/// Truncated AEAD tag size.
pub const TAG_SIZE: usize = 4;

/// Clear prefix: packet type + hop id.
pub const PREFIX_SIZE: usize = 2;

/// Fixed per-frame overhead.
pub const FRAME_OVERHEAD: usize = PREFIX_SIZE + NONCE_SIZE + TAG_SIZE;

/// LoRa physical payload limit.
pub const MAX_FRAME_SIZE: usize = 255;

/// Largest plaintext that fits one frame.
pub const MAX_PLAINTEXT_SIZE: usize = MAX_FRAME_SIZE - FRAME_OVERHEAD;

/// A parsed (still encrypted) radio frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub packet_type: PacketType,
    /// The hop this frame is addressed to on transmit, or the sending hop
    /// on receive (one relay step, not the final destination).
    pub hop: DeviceId,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl RawFrame {
    /// Parse a frame, validating structure only. The hop id range and the
    /// tag are the caller's concern (range needs the device count, the tag
    /// needs the key).
    pub fn parse(buf: &[u8]) -> MeshResult<Self> {
        if buf.len() < FRAME_OVERHEAD {
            return Err(MeshError::BufferTooShort {
                expected: FRAME_OVERHEAD,
                actual: buf.len(),
            });
        }
        if buf.len() > MAX_FRAME_SIZE {
            return Err(MeshError::SizeMismatch {
                expected: MAX_FRAME_SIZE,
                actual: buf.len(),
            });
        }

        let packet_type = PacketType::from_byte(buf[0])?;
        let hop = DeviceId::from_byte(buf[1]);

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buf[PREFIX_SIZE..PREFIX_SIZE + NONCE_SIZE]);

        let ciphertext = buf[PREFIX_SIZE + NONCE_SIZE..buf.len() - TAG_SIZE].to_vec();

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&buf[buf.len() - TAG_SIZE..]);

        Ok(RawFrame {
            packet_type,
            hop,
            nonce,
            ciphertext,
            tag,
        })
    }

    /// Serialize to wire bytes.
    pub fn serialize(&self) -> MeshResult<Vec<u8>> {
        let total = FRAME_OVERHEAD + self.ciphertext.len();
        if total > MAX_FRAME_SIZE {
            return Err(MeshError::SizeMismatch {
                expected: MAX_FRAME_SIZE,
                actual: total,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u8(self.packet_type.to_byte());
        buf.put_u8(self.hop.to_byte());
        buf.put_slice(&self.nonce);
        buf.put_slice(&self.ciphertext);
        buf.put_slice(&self.tag);
        Ok(buf.to_vec())
    }

    /// The clear two-byte prefix, authenticated as AEAD associated data.
    #[inline]
    pub fn prefix(&self) -> [u8; PREFIX_SIZE] {
        [self.packet_type.to_byte(), self.hop.to_byte()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> RawFrame {
        RawFrame {
            packet_type: PacketType::Send,
            hop: DeviceId::new(1),
            nonce: [7u8; NONCE_SIZE],
            ciphertext: vec![1, 2, 3, 4, 5],
            tag: [9u8; TAG_SIZE],
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let f = frame();
        let bytes = f.serialize().unwrap();
        assert_eq!(bytes.len(), FRAME_OVERHEAD + 5);
        assert_eq!(RawFrame::parse(&bytes).unwrap(), f);
    }

    #[test]
    fn test_empty_ciphertext_is_valid() {
        let f = RawFrame {
            ciphertext: Vec::new(),
            ..frame()
        };
        let bytes = f.serialize().unwrap();
        assert_eq!(bytes.len(), FRAME_OVERHEAD);
        assert_eq!(RawFrame::parse(&bytes).unwrap().ciphertext, Vec::<u8>::new());
    }

    #[test]
    fn test_short_frame_rejected() {
        let bytes = frame().serialize().unwrap();
        let result = RawFrame::parse(&bytes[..FRAME_OVERHEAD - 1]);
        assert!(matches!(result, Err(MeshError::BufferTooShort { .. })));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = frame().serialize().unwrap();
        bytes[0] = 0xFF;
        assert!(matches!(
            RawFrame::parse(&bytes),
            Err(MeshError::UnknownPacketType(0xFF))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let f = RawFrame {
            ciphertext: vec![0u8; MAX_PLAINTEXT_SIZE + 1],
            ..frame()
        };
        assert!(f.serialize().is_err());
    }

    #[test]
    fn test_prefix() {
        let f = frame();
        assert_eq!(f.prefix(), [3, 1]);
    }
}

//! Packet types

use fern_core::{MeshError, MeshResult};

/// Wire packet type byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum PacketType {
    /// Gateway -> mesh time broadcast; payload is a [`fern_core::WallTime`].
    Time = 0,
    /// Node -> gateway time request; payload is the requester id.
    AskTime = 1,
    /// Hop-by-hop delivery confirmation travelling back along the route.
    Ack = 2,
    /// Measurement sample travelling toward the gateway.
    Send = 3,
}

impl PacketType {
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> MeshResult<Self> {
        match byte {
            0 => Ok(PacketType::Time),
            1 => Ok(PacketType::AskTime),
            2 => Ok(PacketType::Ack),
            3 => Ok(PacketType::Send),
            other => Err(MeshError::UnknownPacketType(other)),
        }
    }
}

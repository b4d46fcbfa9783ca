//! Decrypted payload layouts
//!
//! Payloads (after AEAD):
//! - TIME:    `[wall_time:7]`
//! - ASKTIME: `[requester:1]`
//! - SEND:    `[origin:1][route_len:1][route:N][serial:4][sample:27]`
//! - ACK:     `[origin:1][route_len:1][route:N][serial:4]`
//!
//! The declared `route_len` lets every receiver recompute the exact
//! expected payload size before touching any field behind the route, so a
//! truncated or extended route list is rejected outright.

use fern_core::{
    DeviceId, MeshError, MeshResult, Sample, SerialNumber, WallTime, SAMPLE_SIZE, WALL_TIME_SIZE,
};

use crate::PacketType;

/// Route lists are bounded by topology depth; 16 hops is far beyond any
/// provisioned tree and keeps the worst-case frame small.
pub const MAX_ROUTE_HOPS: usize = 16;

/// SEND payload size for a route of length N is `SEND_FIXED_SIZE + N`.
pub const SEND_FIXED_SIZE: usize = 1 + 1 + 4 + SAMPLE_SIZE;

/// ACK payload size for a route of length N is `ACK_FIXED_SIZE + N`.
pub const ACK_FIXED_SIZE: usize = 1 + 1 + 4;

/// The ordered record of traversed hops in SEND/ACK payloads.
///
/// The first entry is always the originating device. Each forwarding hop
/// appends its own id on the way to the gateway; the ACK consumes hops
/// from the tail (the gateway-nearest end) on the way back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteList {
    hops: Vec<DeviceId>,
}

impl RouteList {
    /// A fresh route containing only the origin.
    pub fn new(origin: DeviceId) -> Self {
        RouteList { hops: vec![origin] }
    }

    fn from_hops(hops: Vec<DeviceId>) -> MeshResult<Self> {
        if hops.is_empty() {
            return Err(MeshError::InvalidRouteList("empty route"));
        }
        if hops.len() > MAX_ROUTE_HOPS {
            return Err(MeshError::InvalidRouteList("route too long"));
        }
        Ok(RouteList { hops })
    }

    /// The originating device (first entry).
    #[inline]
    pub fn origin(&self) -> DeviceId {
        self.hops[0]
    }

    /// The most recent forwarder (gateway-nearest end).
    #[inline]
    pub fn tail(&self) -> DeviceId {
        *self.hops.last().expect("route is never empty")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn hops(&self) -> &[DeviceId] {
        &self.hops
    }

    /// Record a forwarding hop.
    pub fn append(&mut self, hop: DeviceId) -> MeshResult<()> {
        if self.hops.len() >= MAX_ROUTE_HOPS {
            return Err(MeshError::InvalidRouteList("route too long"));
        }
        self.hops.push(hop);
        Ok(())
    }

    /// Remove the tail hop on the ACK return path. Fails on a route that
    /// is already down to the origin alone.
    pub fn strip_tail(&mut self) -> MeshResult<DeviceId> {
        if self.hops.len() < 2 {
            return Err(MeshError::InvalidRouteList("route exhausted"));
        }
        Ok(self.hops.pop().expect("checked length"))
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.hops.len() as u8);
        buf.extend(self.hops.iter().map(|hop| hop.to_byte()));
    }
}

/// TIME payload: the gateway's wall clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimePayload {
    pub time: WallTime,
}

impl TimePayload {
    pub fn encode(&self) -> Vec<u8> {
        self.time.to_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> MeshResult<Self> {
        if buf.len() != WALL_TIME_SIZE {
            return Err(MeshError::SizeMismatch {
                expected: WALL_TIME_SIZE,
                actual: buf.len(),
            });
        }
        Ok(TimePayload {
            time: WallTime::decode(buf)?,
        })
    }
}

/// ASKTIME payload: the device requesting a TIME broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AskTimePayload {
    pub requester: DeviceId,
}

impl AskTimePayload {
    pub fn encode(&self) -> Vec<u8> {
        vec![self.requester.to_byte()]
    }

    pub fn decode(buf: &[u8]) -> MeshResult<Self> {
        if buf.len() != 1 {
            return Err(MeshError::SizeMismatch {
                expected: 1,
                actual: buf.len(),
            });
        }
        Ok(AskTimePayload {
            requester: DeviceId::from_byte(buf[0]),
        })
    }
}

/// SEND payload: one sample in flight toward the gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct SendPayload {
    pub origin: DeviceId,
    pub route: RouteList,
    pub serial: SerialNumber,
    pub sample: Sample,
}

impl SendPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SEND_FIXED_SIZE + self.route.len());
        buf.push(self.origin.to_byte());
        self.route.encode_into(&mut buf);
        buf.extend_from_slice(&self.serial.to_bytes());
        buf.extend_from_slice(&self.sample.to_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> MeshResult<Self> {
        let (origin, route, rest) = decode_routed_header(buf, SEND_FIXED_SIZE)?;
        let serial = SerialNumber::from_bytes(rest[0..4].try_into().expect("checked length"));
        let sample = Sample::decode(&rest[4..])?;
        Ok(SendPayload {
            origin,
            route,
            serial,
            sample,
        })
    }
}

/// ACK payload: delivery confirmation travelling back along the route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckPayload {
    pub origin: DeviceId,
    pub route: RouteList,
    pub serial: SerialNumber,
}

impl AckPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ACK_FIXED_SIZE + self.route.len());
        buf.push(self.origin.to_byte());
        self.route.encode_into(&mut buf);
        buf.extend_from_slice(&self.serial.to_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> MeshResult<Self> {
        let (origin, route, rest) = decode_routed_header(buf, ACK_FIXED_SIZE)?;
        let serial = SerialNumber::from_bytes(rest[0..4].try_into().expect("checked length"));
        Ok(AckPayload {
            origin,
            route,
            serial,
        })
    }
}

/// Shared header of SEND and ACK: `[origin][route_len][route...]`, with the
/// exact total size recomputed from the declared route length. Returns the
/// bytes behind the route.
fn decode_routed_header(buf: &[u8], fixed_size: usize) -> MeshResult<(DeviceId, RouteList, &[u8])> {
    if buf.len() < fixed_size + 1 {
        return Err(MeshError::BufferTooShort {
            expected: fixed_size + 1,
            actual: buf.len(),
        });
    }

    let origin = DeviceId::from_byte(buf[0]);
    let route_len = buf[1] as usize;
    if route_len == 0 || route_len > MAX_ROUTE_HOPS {
        return Err(MeshError::InvalidRouteList("bad declared length"));
    }

    let expected = fixed_size + route_len;
    if buf.len() != expected {
        return Err(MeshError::SizeMismatch {
            expected,
            actual: buf.len(),
        });
    }

    let hops = buf[2..2 + route_len]
        .iter()
        .map(|byte| DeviceId::from_byte(*byte))
        .collect();
    let route = RouteList::from_hops(hops)?;
    if route.origin() != origin {
        return Err(MeshError::InvalidRouteList("origin not first hop"));
    }

    Ok((origin, route, &buf[2 + route_len..]))
}

/// A typed, validated packet payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Time(TimePayload),
    AskTime(AskTimePayload),
    Send(SendPayload),
    Ack(AckPayload),
}

impl Payload {
    /// Decode the plaintext of a packet of the given type.
    pub fn decode(packet_type: PacketType, buf: &[u8]) -> MeshResult<Self> {
        match packet_type {
            PacketType::Time => TimePayload::decode(buf).map(Payload::Time),
            PacketType::AskTime => AskTimePayload::decode(buf).map(Payload::AskTime),
            PacketType::Send => SendPayload::decode(buf).map(Payload::Send),
            PacketType::Ack => AckPayload::decode(buf).map(Payload::Ack),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Payload::Time(_) => PacketType::Time,
            Payload::AskTime(_) => PacketType::AskTime,
            Payload::Send(_) => PacketType::Send,
            Payload::Ack(_) => PacketType::Ack,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Time(p) => p.encode(),
            Payload::AskTime(p) => p.encode(),
            Payload::Send(p) => p.encode(),
            Payload::Ack(p) => p.encode(),
        }
    }
}

//! Device configuration
//!
//! One immutable [`MeshConfig`] is constructed at startup and injected into
//! every subsystem. Nothing reads configuration from globals; the routing
//! table, intervals, and the link key all live here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DeviceId, MeshError, MeshResult};

/// Pre-shared link key size (AES-128).
pub const LINK_KEY_SIZE: usize = 16;

/// Static child -> parent routing table.
///
/// The mesh is a provisioned tree rooted at the gateway; every non-gateway
/// device has exactly one parent one hop closer to the gateway.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RouteTable {
    /// `(child, parent)` pairs, one per non-gateway device.
    pairs: Vec<(u8, u8)>,
}

impl RouteTable {
    pub fn new(pairs: Vec<(u8, u8)>) -> Self {
        RouteTable { pairs }
    }

    /// The parent hop for `device`, if provisioned.
    pub fn parent_of(&self, device: DeviceId) -> Option<DeviceId> {
        self.pairs
            .iter()
            .find(|(child, _)| *child == device.to_byte())
            .map(|(_, parent)| DeviceId::from_byte(*parent))
    }

    /// All direct children of `device`.
    pub fn children_of(&self, device: DeviceId) -> impl Iterator<Item = DeviceId> + '_ {
        self.pairs
            .iter()
            .filter(move |(_, parent)| *parent == device.to_byte())
            .map(|(child, _)| DeviceId::from_byte(*child))
    }

    /// Number of hops from `device` to the gateway, or None if the chain
    /// never reaches it (broken or cyclic provisioning).
    pub fn depth_of(&self, device: DeviceId) -> Option<usize> {
        let mut current = device;
        let mut depth = 0;
        while !current.is_gateway() {
            current = self.parent_of(current)?;
            depth += 1;
            if depth > self.pairs.len() {
                return None; // cycle
            }
        }
        Some(depth)
    }

    /// The deepest chain in the table, in hops.
    pub fn max_depth(&self) -> usize {
        self.pairs
            .iter()
            .filter_map(|(child, _)| self.depth_of(DeviceId::from_byte(*child)))
            .max()
            .unwrap_or(0)
    }
}

/// Immutable per-device configuration, fixed at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshConfig {
    /// This device's id; 0 means gateway.
    pub device_id: u8,
    /// Total provisioned devices, gateway included.
    pub device_count: u8,
    /// Pre-shared 128-bit link key.
    pub secret_key: [u8; LINK_KEY_SIZE],
    /// Static routing table for the whole mesh.
    pub routing: RouteTable,

    /// Interval between measurements, ms.
    pub measure_interval_ms: u64,
    /// Wait for an ACK after each send attempt, ms.
    pub ack_timeout_ms: u64,
    /// Send attempts per sample per push cycle.
    pub resend_count: u32,
    /// Interval between time synchronizations, ms.
    pub sync_interval_ms: u64,
    /// Wait for a TIME reply after ASKTIME, ms.
    pub sync_timeout_ms: u64,
    /// Receive poll slice, ms.
    pub receive_poll_ms: u64,
    /// Interval between queue compactions, ms.
    pub cleanup_interval_ms: u64,
    /// Below this remaining time, low-power suspension is not worth its
    /// fixed entry/exit cost, ms.
    pub sleep_margin_ms: u64,
    /// Upper bound on any single arbiter wait slice, ms.
    pub max_slice_ms: u64,
}

impl MeshConfig {
    /// Validate the configuration. Called once at startup; a rejected
    /// config is a provisioning defect, not a runtime condition.
    pub fn validate(&self) -> MeshResult<()> {
        if self.device_count == 0 {
            return Err(MeshError::InvalidConfig("device_count is zero".into()));
        }
        if !self.device().in_range(self.device_count) {
            return Err(MeshError::InvalidConfig(format!(
                "device id {} out of range 0..{}",
                self.device_id, self.device_count
            )));
        }
        for id in 1..self.device_count {
            let device = DeviceId::from_byte(id);
            if self.routing.depth_of(device).is_none() {
                return Err(MeshError::InvalidConfig(format!(
                    "device {id} has no parent chain to the gateway"
                )));
            }
        }
        if self.resend_count == 0 {
            return Err(MeshError::InvalidConfig("resend_count is zero".into()));
        }
        if self.ack_timeout_ms == 0 || self.measure_interval_ms == 0 {
            return Err(MeshError::InvalidConfig("zero interval".into()));
        }
        Ok(())
    }

    #[inline]
    pub fn device(&self) -> DeviceId {
        DeviceId::from_byte(self.device_id)
    }

    #[inline]
    pub fn is_gateway(&self) -> bool {
        self.device().is_gateway()
    }

    /// This device's parent hop. The gateway has none.
    pub fn parent(&self) -> Option<DeviceId> {
        if self.is_gateway() {
            None
        } else {
            self.routing.parent_of(self.device())
        }
    }

    pub fn measure_interval(&self) -> Duration {
        Duration::from_millis(self.measure_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn sleep_margin(&self) -> Duration {
        Duration::from_millis(self.sleep_margin_ms)
    }

    pub fn max_slice(&self) -> Duration {
        Duration::from_millis(self.max_slice_ms)
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            device_id: 0,
            device_count: 1,
            secret_key: [0u8; LINK_KEY_SIZE],
            routing: RouteTable::default(),
            measure_interval_ms: 60_000,
            ack_timeout_ms: 2_000,
            resend_count: 4,
            sync_interval_ms: 3_600_000,
            sync_timeout_ms: 5_000,
            receive_poll_ms: 100,
            cleanup_interval_ms: 86_400_000,
            sleep_margin_ms: 50,
            max_slice_ms: 60_000,
        }
    }
}

//! External collaborator contracts
//!
//! Sensor hardware, the upload path, and the RTC/NTP clock source are
//! outside the mesh core; the runtime only sees these traits.

use fern_core::{DeviceId, Sample, SerialNumber, WallTime};

/// Sensor hardware. `None` means the read failed; the cycle is skipped.
pub trait Sensor: Send + Sync {
    fn measure(&self) -> Option<Sample>;
}

/// External network upload (gateway only). Deduplication of redelivered
/// samples is this collaborator's concern.
pub trait Uplink: Send + Sync {
    fn upload(&self, origin: DeviceId, serial: SerialNumber, sample: &Sample) -> bool;
}

/// Wall-clock source: the RTC on every device, NTP behind it on the
/// gateway.
pub trait TimeSource: Send + Sync {
    fn set_wall_clock(&self, time: WallTime);
    fn wall_clock(&self) -> Option<WallTime>;

    /// Fetch fresh time from the external source (gateway only).
    fn read_ntp(&self) -> Option<WallTime> {
        None
    }
}

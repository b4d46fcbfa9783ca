//! Router-to-runtime bridging

use std::sync::Arc;

use parking_lot::Mutex;

use fern_core::{DeviceId, Sample, SerialNumber, WallTime};
use fern_mesh::MeshHooks;
use fern_sched::{Scheduler, TimerHandle};

use crate::{TimeSource, Uplink};

/// Shared record of the last successful time synchronization, on the
/// scheduler's monotonic axis.
#[derive(Default)]
pub struct SyncState {
    last_sync_ms: Mutex<Option<u64>>,
}

impl SyncState {
    pub fn mark(&self, now_ms: u64) {
        *self.last_sync_ms.lock() = Some(now_ms);
    }

    pub fn last_sync_ms(&self) -> Option<u64> {
        *self.last_sync_ms.lock()
    }
}

/// The runtime's implementation of the router's collaborator surface.
pub struct RuntimeHooks {
    time_source: Arc<dyn TimeSource>,
    uplink: Option<Arc<dyn Uplink>>,
    scheduler: Scheduler,
    sync: Arc<SyncState>,
    /// Signaled on synchronization so a time-sync task waiting out its
    /// ASKTIME window wakes immediately.
    sync_timer: TimerHandle,
}

impl RuntimeHooks {
    pub fn new(
        time_source: Arc<dyn TimeSource>,
        uplink: Option<Arc<dyn Uplink>>,
        scheduler: Scheduler,
        sync: Arc<SyncState>,
        sync_timer: TimerHandle,
    ) -> Self {
        RuntimeHooks {
            time_source,
            uplink,
            scheduler,
            sync,
            sync_timer,
        }
    }
}

impl MeshHooks for RuntimeHooks {
    fn set_wall_clock(&self, time: WallTime) {
        self.time_source.set_wall_clock(time);
    }

    fn time_synchronized(&self) {
        self.sync.mark(self.scheduler.now_ms());
        self.sync_timer.signal();
    }

    fn wall_clock(&self) -> Option<WallTime> {
        self.time_source.wall_clock()
    }

    fn upload(&self, origin: DeviceId, serial: SerialNumber, sample: &Sample) -> bool {
        match &self.uplink {
            Some(uplink) => uplink.upload(origin, serial, sample),
            None => {
                tracing::warn!(%origin, "no uplink provisioned, refusing sample");
                false
            }
        }
    }
}

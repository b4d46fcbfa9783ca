//! The always-running task loops
//!
//! Every loop follows the same shape: do the cycle's work, compute the
//! longest safe wait before the next mandatory action, arm its timer, and
//! block on it. Each loop is its own last line of defense: failures are
//! logged and the loop continues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fern_mesh::{MeshRouter, Radio, SendOutcome};
use fern_sched::{Scheduler, TimerHandle};
use fern_store::{OutboundQueue, RecordStore};

use crate::{RuntimeHooks, Sensor, SyncState, TimeSource, Uplink};

pub(crate) struct MeasureTask<S: RecordStore + 'static> {
    pub sensor: Arc<dyn Sensor>,
    pub queue: Arc<OutboundQueue<S>>,
    pub timer: TimerHandle,
    pub push_timer: TimerHandle,
    pub interval: Duration,
    pub running: Arc<AtomicBool>,
}

impl<S: RecordStore + 'static> MeasureTask<S> {
    pub fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            match self.sensor.measure() {
                Some(sample) => {
                    tracing::debug!(time = %sample.time, "sample measured");
                    match self.queue.push(sample) {
                        Ok(()) => self.push_timer.signal(),
                        Err(err) => tracing::warn!(%err, "queue push failed, sample dropped"),
                    }
                }
                None => tracing::warn!("measurement failed, skipping cycle"),
            }
            self.timer.sleep(self.interval);
        }
    }
}

/// Node push: drain the queue through the send state machine. Holds the
/// keep-awake guard across each multi-attempt delivery so low-power
/// suspension cannot close the ACK window.
pub(crate) struct PushTask<R: Radio, S: RecordStore + 'static> {
    pub router: Arc<MeshRouter<R>>,
    pub queue: Arc<OutboundQueue<S>>,
    pub scheduler: Scheduler,
    pub timer: TimerHandle,
    pub idle: Duration,
    pub running: Arc<AtomicBool>,
}

impl<R: Radio, S: RecordStore + 'static> PushTask<R, S> {
    pub fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            while let Some(sample) = self.queue.peek() {
                if !self.running.load(Ordering::SeqCst) {
                    return;
                }
                let _awake = self.scheduler.keep_awake();
                match self.router.deliver(&sample) {
                    Ok(SendOutcome::Acked(serial)) => {
                        tracing::debug!(%serial, "delivery confirmed");
                        if let Err(err) = self.queue.advance() {
                            tracing::warn!(%err, "queue advance failed");
                            break;
                        }
                    }
                    Ok(SendOutcome::TimedOut) => {
                        tracing::warn!("retries exhausted, sample stays queued");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(%err, "delivery failed");
                        break;
                    }
                }
            }
            self.timer.sleep(self.idle);
        }
    }
}

/// Gateway push: samples measured locally skip the radio and go straight
/// to the uplink, numbered from the same serial counter.
pub(crate) struct GatewayPushTask<R: Radio, S: RecordStore + 'static> {
    pub router: Arc<MeshRouter<R>>,
    pub queue: Arc<OutboundQueue<S>>,
    pub uplink: Option<Arc<dyn Uplink>>,
    pub timer: TimerHandle,
    pub idle: Duration,
    pub running: Arc<AtomicBool>,
}

impl<R: Radio, S: RecordStore + 'static> GatewayPushTask<R, S> {
    pub fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            while let Some(sample) = self.queue.peek() {
                let Some(uplink) = &self.uplink else {
                    tracing::warn!("no uplink provisioned, sample stays queued");
                    break;
                };
                let device = self.router.config().device();
                let serial = self.router.sender().next_serial();
                if !uplink.upload(device, serial, &sample) {
                    tracing::warn!(%serial, "upload failed, sample stays queued");
                    break;
                }
                if let Err(err) = self.queue.advance() {
                    tracing::warn!(%err, "queue advance failed");
                    break;
                }
            }
            self.timer.sleep(self.idle);
        }
    }
}

/// Node time-sync: ASKTIME when the interval elapses, then wait out the
/// reply window with the radio held awake. The accepted TIME signals this
/// task's timer through the hooks.
pub(crate) struct TimeSyncTask<R: Radio> {
    pub router: Arc<MeshRouter<R>>,
    pub scheduler: Scheduler,
    pub sync: Arc<SyncState>,
    pub timer: TimerHandle,
    pub interval: Duration,
    pub timeout: Duration,
    pub running: Arc<AtomicBool>,
}

impl<R: Radio> TimeSyncTask<R> {
    pub fn run(self) {
        let interval_ms = self.interval.as_millis() as u64;
        while self.running.load(Ordering::SeqCst) {
            let elapsed = self
                .sync
                .last_sync_ms()
                .map(|last| self.scheduler.now_ms().saturating_sub(last));

            match elapsed {
                Some(elapsed) if elapsed < interval_ms => {
                    self.timer.sleep(Duration::from_millis(interval_ms - elapsed));
                }
                _ => {
                    if let Err(err) = self.router.ask_time() {
                        tracing::warn!(%err, "ASKTIME transmit failed");
                    }
                    let _awake = self.scheduler.keep_awake();
                    self.timer.sleep(self.timeout);
                }
            }
        }
    }
}

/// Gateway time-sync: pull NTP, set the clock, broadcast TIME.
pub(crate) struct GatewayTimeTask<R: Radio> {
    pub router: Arc<MeshRouter<R>>,
    pub time_source: Arc<dyn TimeSource>,
    pub timer: TimerHandle,
    pub interval: Duration,
    pub running: Arc<AtomicBool>,
}

impl<R: Radio> GatewayTimeTask<R> {
    pub fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            match self.time_source.read_ntp() {
                Some(time) => {
                    self.time_source.set_wall_clock(time);
                    if let Err(err) = self.router.broadcast_time(time) {
                        tracing::warn!(%err, "TIME broadcast failed");
                    }
                }
                None => tracing::warn!("NTP read failed"),
            }
            self.timer.sleep(self.interval);
        }
    }
}

/// Receive: poll the radio in bounded slices, dispatching strictly one
/// packet at a time.
pub(crate) struct ReceiveTask<R: Radio> {
    pub router: Arc<MeshRouter<R>>,
    pub hooks: Arc<RuntimeHooks>,
    pub timer: TimerHandle,
    pub poll: Duration,
    pub running: Arc<AtomicBool>,
}

impl<R: Radio> ReceiveTask<R> {
    pub fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            loop {
                match self.router.poll_receive() {
                    Ok(Some(raw)) => self.router.handle_frame(&raw, self.hooks.as_ref()),
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(%err, "radio receive failed");
                        break;
                    }
                }
            }
            self.timer.sleep(self.poll);
        }
    }
}

/// Cleanup: periodic crash-safe compaction of the durable queue.
pub(crate) struct CleanupTask<S: RecordStore + 'static> {
    pub queue: Arc<OutboundQueue<S>>,
    pub timer: TimerHandle,
    pub interval: Duration,
    pub running: Arc<AtomicBool>,
}

impl<S: RecordStore + 'static> CleanupTask<S> {
    pub fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            self.timer.sleep(self.interval);
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            match self.queue.compact() {
                Ok(()) => tracing::debug!(backlog = self.queue.backlog(), "queue compacted"),
                Err(err) => tracing::warn!(%err, "queue compaction failed"),
            }
        }
    }
}

//! Node assembly
//!
//! [`MeshNode::start`] wires configuration and platform collaborators into
//! the full task set and spawns one named thread per task plus the
//! arbiter. Stopping signals every timer and joins the threads; on real
//! hardware the node simply runs forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use fern_core::{MeshConfig, MeshResult};
use fern_mesh::{MeshRouter, Radio};
use fern_sched::{MonotonicClock, PowerGate, Scheduler, SchedulerConfig, TimerHandle};
use fern_store::{OutboundQueue, RecordStore};

use crate::tasks::{
    CleanupTask, GatewayPushTask, GatewayTimeTask, MeasureTask, PushTask, ReceiveTask,
    TimeSyncTask,
};
use crate::{RuntimeHooks, Sensor, SyncState, TimeSource, Uplink};

/// Hardware and collaborator surface a node runs on.
pub struct Platform<R: Radio, S: RecordStore + 'static> {
    pub radio: R,
    pub store: S,
    pub sensor: Arc<dyn Sensor>,
    /// Gateway only.
    pub uplink: Option<Arc<dyn Uplink>>,
    pub time_source: Arc<dyn TimeSource>,
}

/// Suspension gate that powers the radio down before the device sleeps.
struct RadioPowerGate<R: Radio> {
    router: Arc<MeshRouter<R>>,
}

impl<R: Radio> PowerGate for RadioPowerGate<R> {
    fn suspend(&self, duration: Duration) {
        self.router.power_down_radio();
        // Stand-in for the hardware timer wake; the radio driver powers
        // back up lazily on the next transaction.
        std::thread::sleep(duration);
    }
}

/// A running mesh node.
pub struct MeshNode<R: Radio, S: RecordStore + 'static> {
    config: Arc<MeshConfig>,
    scheduler: Scheduler,
    router: Arc<MeshRouter<R>>,
    queue: Arc<OutboundQueue<S>>,
    running: Arc<AtomicBool>,
    timers: Vec<TimerHandle>,
    threads: Vec<JoinHandle<()>>,
}

impl<R: Radio, S: RecordStore + 'static> MeshNode<R, S> {
    pub fn start(config: MeshConfig, platform: Platform<R, S>) -> MeshResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let router = Arc::new(MeshRouter::new(Arc::clone(&config), platform.radio)?);
        let queue = Arc::new(OutboundQueue::open(platform.store)?);

        let scheduler = Scheduler::new(
            SchedulerConfig {
                margin: config.sleep_margin(),
                max_slice: config.max_slice(),
            },
            MonotonicClock::new(),
            RadioPowerGate {
                router: Arc::clone(&router),
            },
        );

        let running = Arc::new(AtomicBool::new(true));
        let sync = Arc::new(SyncState::default());

        let measure_timer = scheduler.register();
        let push_timer = scheduler.register();
        let sync_timer = scheduler.register();
        let receive_timer = scheduler.register();
        let cleanup_timer = scheduler.register();

        let hooks = Arc::new(RuntimeHooks::new(
            Arc::clone(&platform.time_source),
            platform.uplink.clone(),
            scheduler.clone(),
            Arc::clone(&sync),
            sync_timer.clone(),
        ));

        let mut threads = Vec::new();

        threads.push(spawn(
            "fern-measure",
            MeasureTask {
                sensor: Arc::clone(&platform.sensor),
                queue: Arc::clone(&queue),
                timer: measure_timer.clone(),
                push_timer: push_timer.clone(),
                interval: config.measure_interval(),
                running: Arc::clone(&running),
            },
            MeasureTask::run,
        ));

        if config.is_gateway() {
            threads.push(spawn(
                "fern-push",
                GatewayPushTask {
                    router: Arc::clone(&router),
                    queue: Arc::clone(&queue),
                    uplink: platform.uplink.clone(),
                    timer: push_timer.clone(),
                    idle: config.measure_interval(),
                    running: Arc::clone(&running),
                },
                GatewayPushTask::run,
            ));
            threads.push(spawn(
                "fern-timesync",
                GatewayTimeTask {
                    router: Arc::clone(&router),
                    time_source: Arc::clone(&platform.time_source),
                    timer: sync_timer.clone(),
                    interval: config.sync_interval(),
                    running: Arc::clone(&running),
                },
                GatewayTimeTask::run,
            ));
        } else {
            threads.push(spawn(
                "fern-push",
                PushTask {
                    router: Arc::clone(&router),
                    queue: Arc::clone(&queue),
                    scheduler: scheduler.clone(),
                    timer: push_timer.clone(),
                    idle: config.measure_interval(),
                    running: Arc::clone(&running),
                },
                PushTask::run,
            ));
            threads.push(spawn(
                "fern-timesync",
                TimeSyncTask {
                    router: Arc::clone(&router),
                    scheduler: scheduler.clone(),
                    sync: Arc::clone(&sync),
                    timer: sync_timer.clone(),
                    interval: config.sync_interval(),
                    timeout: config.sync_timeout(),
                    running: Arc::clone(&running),
                },
                TimeSyncTask::run,
            ));
        }

        threads.push(spawn(
            "fern-receive",
            ReceiveTask {
                router: Arc::clone(&router),
                hooks,
                timer: receive_timer.clone(),
                poll: config.receive_poll(),
                running: Arc::clone(&running),
            },
            ReceiveTask::run,
        ));

        threads.push(spawn(
            "fern-cleanup",
            CleanupTask {
                queue: Arc::clone(&queue),
                timer: cleanup_timer.clone(),
                interval: config.cleanup_interval(),
                running: Arc::clone(&running),
            },
            CleanupTask::run,
        ));

        {
            let scheduler = scheduler.clone();
            threads.push(
                std::thread::Builder::new()
                    .name("fern-arbiter".into())
                    .spawn(move || scheduler.run())
                    .expect("spawn arbiter thread"),
            );
        }

        Ok(MeshNode {
            config,
            scheduler,
            router,
            queue,
            running,
            timers: vec![
                measure_timer,
                push_timer,
                sync_timer,
                receive_timer,
                cleanup_timer,
            ],
            threads,
        })
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<MeshRouter<R>> {
        &self.router
    }

    pub fn queue(&self) -> &Arc<OutboundQueue<S>> {
        &self.queue
    }

    /// Stop every task and join their threads.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        for timer in &self.timers {
            timer.signal();
        }
        self.scheduler.shutdown();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::warn!("task thread panicked during shutdown");
            }
        }
    }
}

fn spawn<T: Send + 'static>(
    name: &str,
    task: T,
    run: impl FnOnce(T) + Send + 'static,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || run(task))
        .unwrap_or_else(|err| panic!("spawn {name}: {err}"))
}

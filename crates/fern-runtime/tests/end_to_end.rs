//! Full-path integration: measure -> SEND -> forward -> upload -> ACK ->
//! queue advance, across a three-device chain on a shared radio medium.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use fern_core::{DeviceId, MeshConfig, RouteTable, Sample, SerialNumber, WallTime};
use fern_mesh::Radio;
use fern_runtime::{MeshNode, Platform, Sensor, TimeSource, Uplink};
use fern_store::MemoryStore;

/// Broadcast medium: every endpoint hears every other endpoint's frames.
#[derive(Default)]
struct RadioBus {
    endpoints: Mutex<Vec<(usize, Arc<Inbox>)>>,
}

#[derive(Default)]
struct Inbox {
    frames: Mutex<VecDeque<Vec<u8>>>,
}

struct BusRadio {
    id: usize,
    bus: Arc<RadioBus>,
    inbox: Arc<Inbox>,
}

impl RadioBus {
    fn attach(self: &Arc<Self>, id: usize) -> BusRadio {
        let inbox = Arc::new(Inbox::default());
        self.endpoints.lock().push((id, Arc::clone(&inbox)));
        BusRadio {
            id,
            bus: Arc::clone(self),
            inbox,
        }
    }
}

impl Radio for BusRadio {
    fn transmit(&self, frame: &[u8]) -> fern_core::MeshResult<()> {
        for (id, inbox) in self.bus.endpoints.lock().iter() {
            if *id != self.id {
                inbox.frames.lock().push_back(frame.to_vec());
            }
        }
        Ok(())
    }

    fn try_receive(&self) -> fern_core::MeshResult<Option<Vec<u8>>> {
        Ok(self.inbox.frames.lock().pop_front())
    }
}

/// Produces one sample, then reports read failures.
struct OneShotSensor {
    sample: Sample,
    fired: AtomicBool,
}

impl Sensor for OneShotSensor {
    fn measure(&self) -> Option<Sample> {
        if self.fired.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(self.sample)
        }
    }
}

struct NoSensor;

impl Sensor for NoSensor {
    fn measure(&self) -> Option<Sample> {
        None
    }
}

#[derive(Default)]
struct RecordingUplink {
    records: Mutex<Vec<(DeviceId, SerialNumber, Sample)>>,
}

impl Uplink for RecordingUplink {
    fn upload(&self, origin: DeviceId, serial: SerialNumber, sample: &Sample) -> bool {
        self.records.lock().push((origin, serial, *sample));
        true
    }
}

/// RTC with an optional NTP source behind it (gateway only).
#[derive(Default)]
struct Rtc {
    clock: Mutex<Option<WallTime>>,
    ntp: Option<WallTime>,
}

impl TimeSource for Rtc {
    fn set_wall_clock(&self, time: WallTime) {
        *self.clock.lock() = Some(time);
    }

    fn wall_clock(&self) -> Option<WallTime> {
        *self.clock.lock()
    }

    fn read_ntp(&self) -> Option<WallTime> {
        self.ntp
    }
}

const KEY: [u8; 16] = [0xA5; 16];

fn config(device_id: u8) -> MeshConfig {
    MeshConfig {
        device_id,
        device_count: 3,
        secret_key: KEY,
        routing: RouteTable::new(vec![(1, 0), (2, 1)]),
        measure_interval_ms: 100,
        ack_timeout_ms: 200,
        resend_count: 5,
        sync_interval_ms: 400,
        sync_timeout_ms: 150,
        receive_poll_ms: 10,
        cleanup_interval_ms: 10_000,
        sleep_margin_ms: 5,
        max_slice_ms: 100,
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn sample_travels_two_hops_and_is_acknowledged() {
    let bus = Arc::new(RadioBus::default());
    let ntp_time = WallTime::new(2025, 7, 1, 9, 30, 0);
    let sample = Sample {
        time: WallTime::new(2025, 7, 1, 9, 29, 0),
        battery_voltage: 3.9,
        temperature: 22.5,
        ..Default::default()
    };

    let uplink = Arc::new(RecordingUplink::default());
    let gateway_rtc = Arc::new(Rtc {
        ntp: Some(ntp_time),
        ..Default::default()
    });
    let relay_rtc = Arc::new(Rtc::default());
    let leaf_rtc = Arc::new(Rtc::default());

    let gateway = MeshNode::start(
        config(0),
        Platform {
            radio: bus.attach(0),
            store: MemoryStore::new(),
            sensor: Arc::new(NoSensor),
            uplink: Some(uplink.clone()),
            time_source: gateway_rtc,
        },
    )
    .unwrap();

    let relay = MeshNode::start(
        config(1),
        Platform {
            radio: bus.attach(1),
            store: MemoryStore::new(),
            sensor: Arc::new(NoSensor),
            uplink: None,
            time_source: relay_rtc.clone(),
        },
    )
    .unwrap();

    let leaf = MeshNode::start(
        config(2),
        Platform {
            radio: bus.attach(2),
            store: MemoryStore::new(),
            sensor: Arc::new(OneShotSensor {
                sample,
                fired: AtomicBool::new(false),
            }),
            uplink: None,
            time_source: leaf_rtc.clone(),
        },
    )
    .unwrap();

    // The sample reaches the uplink and the origin's queue drains.
    assert!(
        wait_until(Duration::from_secs(10), || {
            !uplink.records.lock().is_empty() && leaf.queue().backlog() == 0
        }),
        "sample was not delivered and acknowledged in time"
    );

    let records = uplink.records.lock().clone();
    let (origin, _serial, uploaded) = records[0];
    assert_eq!(origin, DeviceId::new(2));
    assert_eq!(uploaded, sample);

    // The gateway's TIME broadcast reached both nodes.
    assert!(
        wait_until(Duration::from_secs(10), || {
            relay_rtc.wall_clock() == Some(ntp_time) && leaf_rtc.wall_clock() == Some(ntp_time)
        }),
        "wall clocks never synchronized"
    );

    leaf.stop();
    relay.stop();
    gateway.stop();
}

#[test]
fn upload_failure_leaves_sample_queued() {
    struct RefusingUplink;
    impl Uplink for RefusingUplink {
        fn upload(&self, _: DeviceId, _: SerialNumber, _: &Sample) -> bool {
            false
        }
    }

    let bus = Arc::new(RadioBus::default());
    let sample = Sample {
        time: WallTime::new(2025, 7, 2, 0, 0, 0),
        ..Default::default()
    };

    // Single-hop mesh: 1 -> 0.
    let mut gateway_config = config(0);
    gateway_config.device_count = 2;
    gateway_config.routing = RouteTable::new(vec![(1, 0)]);
    let mut node_config = config(1);
    node_config.device_count = 2;
    node_config.routing = RouteTable::new(vec![(1, 0)]);
    node_config.resend_count = 2;
    node_config.ack_timeout_ms = 80;

    let gateway = MeshNode::start(
        gateway_config,
        Platform {
            radio: bus.attach(0),
            store: MemoryStore::new(),
            sensor: Arc::new(NoSensor),
            uplink: Some(Arc::new(RefusingUplink)),
            time_source: Arc::new(Rtc::default()),
        },
    )
    .unwrap();

    let node = MeshNode::start(
        node_config,
        Platform {
            radio: bus.attach(1),
            store: MemoryStore::new(),
            sensor: Arc::new(OneShotSensor {
                sample,
                fired: AtomicBool::new(false),
            }),
            uplink: None,
            time_source: Arc::new(Rtc::default()),
        },
    )
    .unwrap();

    // Give the node time to measure and exhaust a retry cycle.
    assert!(wait_until(Duration::from_secs(5), || node.queue().backlog() == 1));
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(node.queue().backlog(), 1, "unacknowledged sample stays queued");

    node.stop();
    gateway.stop();
}

//! The wake arbiter
//!
//! One control task owns the suspend decision for the whole device.
//! Entering and leaving low-power mode has a fixed latency cost and powers
//! the radio down, so remaining time below the margin falls back to an
//! ordinary condvar wait.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::{Clock, TimerSlot, WakeReason};

/// Arbiter wait while some timer is already due; keeps the loop responsive
/// without spinning.
const DUE_WAIT_MS: u64 = 10;

/// Hardware suspension hook. The implementation is responsible for
/// powering the radio down before suspending and restoring it on wake.
pub trait PowerGate: Send + Sync + 'static {
    fn suspend(&self, duration: Duration);
}

/// Host stand-in: a plain bounded sleep of the arbiter.
pub struct HostPowerGate;

impl PowerGate for HostPowerGate {
    fn suspend(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Arbiter decision for one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitPlan {
    /// Ordinary cooperative wait, radio stays powered.
    Cooperative(Duration),
    /// Low-power suspension; the margin is already subtracted.
    Suspend(Duration),
}

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Fixed entry/exit cost of low-power mode.
    pub margin: Duration,
    /// Upper bound on any single wait slice.
    pub max_slice: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            margin: Duration::from_millis(50),
            max_slice: Duration::from_millis(60_000),
        }
    }
}

struct SchedulerShared {
    clock: Box<dyn Clock>,
    gate: Box<dyn PowerGate>,
    timers: Mutex<Vec<Arc<TimerSlot>>>,
    /// Bumped on every arm/signal so an in-progress cooperative wait
    /// re-plans instead of sleeping through a new, shorter deadline.
    epoch: Mutex<u64>,
    wake: Condvar,
    keep_awake: AtomicUsize,
    running: AtomicBool,
    margin_ms: u64,
    max_slice_ms: u64,
}

/// Central wake arbiter. Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

/// Opaque reference to one registered timer.
#[derive(Clone)]
pub struct TimerHandle {
    slot: Arc<TimerSlot>,
    shared: Arc<SchedulerShared>,
}

/// Held while the device must not enter low-power suspension (e.g. across
/// a multi-attempt send, where the radio must stay up for the ACK window).
pub struct KeepAwakeGuard {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, clock: impl Clock, gate: impl PowerGate) -> Self {
        Scheduler {
            shared: Arc::new(SchedulerShared {
                clock: Box::new(clock),
                gate: Box::new(gate),
                timers: Mutex::new(Vec::new()),
                epoch: Mutex::new(0),
                wake: Condvar::new(),
                keep_awake: AtomicUsize::new(0),
                running: AtomicBool::new(true),
                margin_ms: config.margin.as_millis() as u64,
                max_slice_ms: config.max_slice.as_millis() as u64,
            }),
        }
    }

    /// Add a parked timer.
    pub fn register(&self) -> TimerHandle {
        let slot = Arc::new(TimerSlot::new());
        self.shared.timers.lock().push(Arc::clone(&slot));
        TimerHandle {
            slot,
            shared: Arc::clone(&self.shared),
        }
    }

    /// The arbiter's authoritative monotonic now.
    pub fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    pub fn keep_awake(&self) -> KeepAwakeGuard {
        self.shared.keep_awake.fetch_add(1, Ordering::SeqCst);
        KeepAwakeGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Decide the next wait without executing it.
    pub fn plan(&self) -> WaitPlan {
        let shared = &self.shared;
        let now = shared.clock.now_ms();

        let mut any_due = false;
        let mut min_remaining: Option<u64> = None;
        for slot in shared.timers.lock().iter() {
            let state = slot.state.lock();
            if TimerSlot::is_due(&state, now) {
                any_due = true;
            } else if let Some(remaining) = TimerSlot::remaining(&state, now) {
                min_remaining = Some(min_remaining.map_or(remaining, |m| m.min(remaining)));
            }
        }

        if any_due {
            return WaitPlan::Cooperative(Duration::from_millis(DUE_WAIT_MS));
        }

        let wait = min_remaining
            .unwrap_or(shared.max_slice_ms)
            .min(shared.max_slice_ms);

        let held_awake = shared.keep_awake.load(Ordering::SeqCst) > 0;
        if held_awake || wait <= shared.margin_ms {
            WaitPlan::Cooperative(Duration::from_millis(wait))
        } else {
            WaitPlan::Suspend(Duration::from_millis(wait - shared.margin_ms))
        }
    }

    /// Execute one arbiter iteration.
    pub fn step(&self) {
        let shared = &self.shared;
        let epoch_before = *shared.epoch.lock();

        match self.plan() {
            WaitPlan::Cooperative(duration) => {
                let mut epoch = shared.epoch.lock();
                // A timer changed while planning; re-plan immediately.
                if *epoch == epoch_before {
                    shared.wake.wait_for(&mut epoch, duration);
                }
            }
            WaitPlan::Suspend(duration) => {
                tracing::debug!(ms = duration.as_millis() as u64, "entering low-power suspension");
                shared.gate.suspend(duration);
            }
        }
    }

    /// Run the arbiter until [`Scheduler::shutdown`].
    pub fn run(&self) {
        while self.shared.running.load(Ordering::SeqCst) {
            self.step();
        }
    }

    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.notify_arbiter();
    }
}

impl SchedulerShared {
    fn notify_arbiter(&self) {
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        self.wake.notify_all();
    }
}

impl TimerHandle {
    /// Set the deadline to now + `duration`. Called immediately before the
    /// owning task blocks: "wake me in at most `duration`, sooner if a
    /// shorter global sleep is chosen".
    pub fn arm(&self, duration: Duration) {
        {
            let mut state = self.slot.state.lock();
            state.deadline_ms = Some(
                self.shared
                    .clock
                    .now_ms()
                    .saturating_add(duration.as_millis() as u64),
            );
        }
        self.shared.notify_arbiter();
    }

    /// Make the timer appear already due, waking its owner immediately.
    pub fn signal(&self) {
        {
            let mut state = self.slot.state.lock();
            state.signaled = true;
        }
        self.slot.cond.notify_all();
        self.shared.notify_arbiter();
    }

    /// Block until due or signaled. Disarms on return.
    pub fn wait(&self) -> WakeReason {
        let clock = &self.shared.clock;
        self.slot.wait(|| clock.now_ms())
    }

    /// Arm and wait in one call: the per-task idle pattern.
    pub fn sleep(&self, duration: Duration) -> WakeReason {
        self.arm(duration);
        self.wait()
    }
}

impl Drop for KeepAwakeGuard {
    fn drop(&mut self) {
        self.shared.keep_awake.fetch_sub(1, Ordering::SeqCst);
        self.shared.notify_arbiter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, MonotonicClock};
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicU64;

    /// Gate that records every suspension and advances a shared manual
    /// clock by the suspended duration, imitating hardware wake.
    struct RecordingGate {
        clock: Arc<ManualClock>,
        suspensions: PlMutex<Vec<u64>>,
    }

    impl RecordingGate {
        fn new(clock: Arc<ManualClock>) -> Arc<Self> {
            Arc::new(RecordingGate {
                clock,
                suspensions: PlMutex::new(Vec::new()),
            })
        }
    }

    impl PowerGate for Arc<RecordingGate> {
        fn suspend(&self, duration: Duration) {
            self.suspensions.lock().push(duration.as_millis() as u64);
            self.clock.advance(duration.as_millis() as u64);
        }
    }

    impl Clock for Arc<ManualClock> {
        fn now_ms(&self) -> u64 {
            ManualClock::now_ms(self)
        }
    }

    fn manual_scheduler(margin_ms: u64, max_slice_ms: u64) -> (Scheduler, Arc<ManualClock>, Arc<RecordingGate>) {
        let clock = Arc::new(ManualClock::new());
        let gate = RecordingGate::new(Arc::clone(&clock));
        let config = SchedulerConfig {
            margin: Duration::from_millis(margin_ms),
            max_slice: Duration::from_millis(max_slice_ms),
        };
        let scheduler = Scheduler::new(config, Arc::clone(&clock), Arc::clone(&gate));
        (scheduler, clock, gate)
    }

    #[test]
    fn test_plan_picks_minimum_deadline() {
        let (scheduler, _clock, _gate) = manual_scheduler(50, 60_000);
        let t1 = scheduler.register();
        let t2 = scheduler.register();
        t1.arm(Duration::from_millis(30_000));
        t2.arm(Duration::from_millis(5_000));

        assert_eq!(
            scheduler.plan(),
            WaitPlan::Suspend(Duration::from_millis(5_000 - 50))
        );
    }

    #[test]
    fn test_short_deadline_stays_cooperative() {
        let (scheduler, _clock, _gate) = manual_scheduler(50, 60_000);
        let timer = scheduler.register();
        timer.arm(Duration::from_millis(40));

        assert_eq!(
            scheduler.plan(),
            WaitPlan::Cooperative(Duration::from_millis(40))
        );
    }

    #[test]
    fn test_keep_awake_blocks_suspension() {
        let (scheduler, _clock, _gate) = manual_scheduler(50, 60_000);
        let timer = scheduler.register();
        timer.arm(Duration::from_millis(10_000));

        let guard = scheduler.keep_awake();
        assert!(matches!(scheduler.plan(), WaitPlan::Cooperative(_)));
        drop(guard);
        assert!(matches!(scheduler.plan(), WaitPlan::Suspend(_)));
    }

    #[test]
    fn test_due_timer_forces_short_wait() {
        let (scheduler, clock, _gate) = manual_scheduler(50, 60_000);
        let timer = scheduler.register();
        timer.arm(Duration::from_millis(100));
        clock.advance(100);

        assert_eq!(
            scheduler.plan(),
            WaitPlan::Cooperative(Duration::from_millis(DUE_WAIT_MS))
        );
    }

    #[test]
    fn test_signaled_timer_counts_as_due() {
        let (scheduler, _clock, _gate) = manual_scheduler(50, 60_000);
        let timer = scheduler.register();
        timer.arm(Duration::from_millis(30_000));
        timer.signal();

        assert_eq!(
            scheduler.plan(),
            WaitPlan::Cooperative(Duration::from_millis(DUE_WAIT_MS))
        );
    }

    #[test]
    fn test_idle_wait_capped_by_max_slice() {
        let (scheduler, _clock, _gate) = manual_scheduler(50, 60_000);
        // No timer armed at all.
        assert_eq!(
            scheduler.plan(),
            WaitPlan::Suspend(Duration::from_millis(60_000 - 50))
        );
    }

    #[test]
    fn test_single_suspension_for_full_interval() {
        // Measurement interval 60000 ms, margin 50 ms, nothing else due:
        // exactly one 59950 ms suspension, not a sequence of shorter polls.
        let (scheduler, clock, gate) = manual_scheduler(50, 60_000);
        let timer = scheduler.register();
        timer.arm(Duration::from_millis(60_000));

        scheduler.step();
        assert_eq!(*gate.suspensions.lock(), vec![59_950]);
        assert_eq!(clock.now_ms(), 59_950);

        // Within the margin now: the next plan is a plain wait and the
        // timer fires without a second suspension.
        assert_eq!(
            scheduler.plan(),
            WaitPlan::Cooperative(Duration::from_millis(50))
        );
        clock.advance(50);
        assert_eq!(timer.wait(), WakeReason::Deadline);
        assert_eq!(gate.suspensions.lock().len(), 1);
    }

    #[test]
    fn test_arbiter_leaves_other_timers_unfired() {
        let (scheduler, clock, _gate) = manual_scheduler(50, 60_000);
        let short = scheduler.register();
        let long = scheduler.register();
        short.arm(Duration::from_millis(1_000));
        long.arm(Duration::from_millis(30_000));

        scheduler.step();
        // Woke within one margin of min(d_i).
        assert!(clock.now_ms() >= 950 && clock.now_ms() <= 1_000);
        clock.advance(1_000 - clock.now_ms());
        assert_eq!(short.wait(), WakeReason::Deadline);

        let state = long.slot.state.lock();
        assert!(!TimerSlot::is_due(&state, clock.now_ms()));
    }

    #[test]
    fn test_signal_wakes_waiting_task() {
        let config = SchedulerConfig::default();
        let scheduler = Scheduler::new(config, MonotonicClock::new(), HostPowerGate);
        let timer = scheduler.register();
        let observed = Arc::new(AtomicU64::new(0));

        let waiter = {
            let timer = timer.clone();
            let observed = Arc::clone(&observed);
            std::thread::spawn(move || {
                timer.arm(Duration::from_secs(30));
                let reason = timer.wait();
                observed.store(reason as u64 + 1, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        timer.signal();
        waiter.join().unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), WakeReason::Signal as u64 + 1);
    }

    #[test]
    fn test_deadline_wakes_waiting_task() {
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            MonotonicClock::new(),
            HostPowerGate,
        );
        let timer = scheduler.register();
        let start = std::time::Instant::now();
        assert_eq!(timer.sleep(Duration::from_millis(30)), WakeReason::Deadline);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_disarms() {
        let (scheduler, clock, _gate) = manual_scheduler(50, 60_000);
        let timer = scheduler.register();
        timer.arm(Duration::from_millis(10));
        clock.advance(10);
        assert_eq!(timer.wait(), WakeReason::Deadline);

        let state = timer.slot.state.lock();
        assert!(state.deadline_ms.is_none() && !state.signaled);
    }
}

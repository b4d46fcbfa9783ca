//! Per-task timers
//!
//! A timer is `(deadline, signaled)`. The owning task arms it immediately
//! before blocking on it; any other task may `signal` it to make it appear
//! already due. Waking disarms the timer, so each wait must be preceded by
//! its own `arm`.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Why a wait returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeReason {
    /// The armed deadline passed.
    Deadline,
    /// Another task forced the wake.
    Signal,
}

#[derive(Default)]
pub(crate) struct TimerState {
    pub deadline_ms: Option<u64>,
    pub signaled: bool,
}

pub(crate) struct TimerSlot {
    pub state: Mutex<TimerState>,
    pub cond: Condvar,
}

impl TimerSlot {
    pub fn new() -> Self {
        TimerSlot {
            state: Mutex::new(TimerState::default()),
            cond: Condvar::new(),
        }
    }

    /// Due from the arbiter's point of view at `now`.
    pub fn is_due(state: &TimerState, now_ms: u64) -> bool {
        state.signaled || state.deadline_ms.is_some_and(|deadline| now_ms >= deadline)
    }

    /// Remaining time if armed and not yet due.
    pub fn remaining(state: &TimerState, now_ms: u64) -> Option<u64> {
        match state.deadline_ms {
            Some(deadline) if !state.signaled && deadline > now_ms => Some(deadline - now_ms),
            _ => None,
        }
    }

    pub fn wait(&self, now_ms: impl Fn() -> u64) -> WakeReason {
        let mut state = self.state.lock();
        loop {
            if state.signaled {
                state.signaled = false;
                state.deadline_ms = None;
                return WakeReason::Signal;
            }
            match state.deadline_ms {
                Some(deadline) => {
                    let now = now_ms();
                    if now >= deadline {
                        state.deadline_ms = None;
                        return WakeReason::Deadline;
                    }
                    let remaining = Duration::from_millis(deadline - now);
                    self.cond.wait_for(&mut state, remaining);
                }
                // Parked: only a signal can wake us.
                None => {
                    self.cond.wait(&mut state);
                }
            }
        }
    }
}

//! Send state machine
//!
//! Exactly one SEND is in flight per device:
//! `Idle -> Sending(serial) -> { Acked | back to Idle on exhaustion }`.
//! Each retransmission draws a fresh serial, so a stale ACK can never
//! satisfy a later attempt. The push task is the only writer of the serial
//! counter; the receive task's ACK handler only compares and notifies.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use fern_core::SerialNumber;

/// Result of one multi-attempt delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The gateway confirmed this serial.
    Acked(SerialNumber),
    /// Every attempt timed out; the sample stays queued for a later cycle.
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SendState {
    Idle,
    Sending(SerialNumber),
    Acked(SerialNumber),
}

struct SenderInner {
    last_serial: SerialNumber,
    state: SendState,
}

/// Owned in-flight send state.
pub struct Sender {
    inner: Mutex<SenderInner>,
    cond: Condvar,
}

impl Sender {
    pub fn new() -> Self {
        Sender {
            inner: Mutex::new(SenderInner {
                last_serial: SerialNumber::ZERO,
                state: SendState::Idle,
            }),
            cond: Condvar::new(),
        }
    }

    /// Draw the next serial without entering the sending state. The
    /// gateway's direct-upload path numbers its samples with this.
    pub fn next_serial(&self) -> SerialNumber {
        let mut inner = self.inner.lock();
        inner.last_serial = inner.last_serial.next();
        inner.last_serial
    }

    /// Start one attempt: advance the serial and enter `Sending`.
    pub fn begin_attempt(&self) -> SerialNumber {
        let mut inner = self.inner.lock();
        inner.last_serial = inner.last_serial.next();
        inner.state = SendState::Sending(inner.last_serial);
        inner.last_serial
    }

    /// Called from the ACK handler. Returns whether the serial matched the
    /// attempt currently in flight; stale serials are ignored.
    pub fn observe_ack(&self, serial: SerialNumber) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            SendState::Sending(pending) if pending == serial => {
                inner.state = SendState::Acked(serial);
                self.cond.notify_all();
                true
            }
            _ => {
                tracing::debug!(%serial, "ignoring stale or unexpected ack");
                false
            }
        }
    }

    /// Block until the in-flight serial is acknowledged or the ACK window
    /// closes. Returns whether the ACK arrived.
    pub fn await_ack(&self, serial: SerialNumber, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if inner.state == SendState::Acked(serial) {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            self.cond.wait_for(&mut inner, deadline - now);
        }
    }

    /// Return to `Idle` after an attempt cycle completes either way.
    pub fn finish(&self) {
        self.inner.lock().state = SendState::Idle;
    }

    /// The serial currently awaiting an ACK, if any.
    pub fn in_flight(&self) -> Option<SerialNumber> {
        match self.inner.lock().state {
            SendState::Sending(serial) => Some(serial),
            _ => None,
        }
    }
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

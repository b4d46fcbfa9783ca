//! Radio abstraction
//!
//! The physical radio is a single half-duplex resource; the router wraps
//! every transaction in a mutual-exclusion lock, so implementations only
//! need interior mutability, not their own ordering guarantees.

use std::collections::VecDeque;

use parking_lot::Mutex;

use fern_core::MeshResult;

/// One LoRa-class radio.
pub trait Radio: Send + Sync + 'static {
    /// Transmit one frame.
    fn transmit(&self, frame: &[u8]) -> MeshResult<()>;

    /// Fetch the next pending received frame, if any. Non-blocking; the
    /// receive task polls in bounded slices.
    fn try_receive(&self) -> MeshResult<Option<Vec<u8>>>;

    /// Power the radio down ahead of low-power suspension.
    fn power_down(&self) {}
}

/// In-memory radio for tests: scripted inbound frames, captured outbound.
#[derive(Default)]
pub struct MockRadio {
    inbound: Mutex<VecDeque<Vec<u8>>>,
    outbound: Mutex<Vec<Vec<u8>>>,
    fail_transmit: Mutex<bool>,
}

impl MockRadio {
    pub fn new() -> Self {
        MockRadio::default()
    }

    /// Queue a frame as if it arrived over the air.
    pub fn inject(&self, frame: Vec<u8>) {
        self.inbound.lock().push_back(frame);
    }

    /// Drain everything transmitted so far.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound.lock())
    }

    pub fn sent_count(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Make the next transmissions fail, for transient-error paths.
    pub fn set_fail_transmit(&self, fail: bool) {
        *self.fail_transmit.lock() = fail;
    }
}

impl Radio for MockRadio {
    fn transmit(&self, frame: &[u8]) -> MeshResult<()> {
        if *self.fail_transmit.lock() {
            return Err(fern_core::MeshError::Radio("radio busy".into()));
        }
        self.outbound.lock().push(frame.to_vec());
        Ok(())
    }

    fn try_receive(&self) -> MeshResult<Option<Vec<u8>>> {
        Ok(self.inbound.lock().pop_front())
    }
}

impl Radio for std::sync::Arc<MockRadio> {
    fn transmit(&self, frame: &[u8]) -> MeshResult<()> {
        (**self).transmit(frame)
    }

    fn try_receive(&self) -> MeshResult<Option<Vec<u8>>> {
        (**self).try_receive()
    }
}

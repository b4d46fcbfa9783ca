//! FERN Sched - Central wake arbiter
//!
//! Every task declares "wake me by deadline D or sooner" through its own
//! timer; one arbiter owns the authoritative now, scans all armed timers,
//! and decides between an ordinary bounded wait and entering the device's
//! low-power suspended state (radio off) for the minimum remaining time
//! minus a fixed safety margin.

pub mod clock;
pub mod scheduler;
pub mod timer;

pub use clock::*;
pub use scheduler::*;
pub use timer::*;

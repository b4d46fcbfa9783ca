//! FERN Store - Durable FIFO of samples awaiting confirmed delivery
//!
//! [`OutboundQueue`] gives the push task at-least-once delivery: `peek`
//! returns the oldest unconfirmed sample until `advance` commits it, and a
//! crash between the two redelivers. Records leave the backing log only
//! through `compact`, which rewrites then atomically replaces the log.

pub mod queue;
pub mod record;

pub use queue::*;
pub use record::*;

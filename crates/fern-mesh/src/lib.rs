//! FERN Mesh - Packet semantics and static tree routing
//!
//! The mesh is a provisioned tree rooted at the gateway (id 0). Samples
//! travel up the tree in SEND packets, growing a route list one hop id per
//! forwarder; the gateway acknowledges along the reversed route. TIME
//! flows down the tree by re-broadcast; ASKTIME asks the gateway for an
//! immediate TIME.

pub mod radio;
pub mod router;
pub mod sender;

pub use radio::*;
pub use router::*;
pub use sender::*;

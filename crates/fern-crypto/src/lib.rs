//! FERN Crypto - Authenticated encryption for the radio link
//!
//! Every frame is sealed with AES-128-GCM under the mesh's pre-shared key:
//! a fresh 96-bit random nonce per frame, the clear `[type][hop]` prefix as
//! associated data, and the tag truncated to 32 bits to fit the LoRa
//! frame limit.

pub mod aead;
pub mod link;

pub use aead::*;
pub use link::*;

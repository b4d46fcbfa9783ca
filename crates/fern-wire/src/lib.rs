//! FERN Wire - Radio frame format and payload encoding
//!
//! Frame = `[type:1][hop:1][nonce:12][ciphertext:N][tag:4]`
//!
//! The two-byte prefix travels in the clear (it is the AEAD associated
//! data); everything after the nonce is ciphertext. Payload codecs in this
//! crate operate on decrypted plaintext and produce typed, validated
//! packet variants; no buffer is ever reinterpreted as a struct.

pub mod frame;
pub mod packet;
pub mod payload;

pub use frame::*;
pub use packet::*;
pub use payload::*;

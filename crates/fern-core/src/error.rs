//! Error types for the FERN mesh

use thiserror::Error;

use crate::DeviceId;

/// Mesh-wide errors. Protocol validation failures never cross into routing
/// decisions as panics; callers log and drop.
#[derive(Error, Debug)]
pub enum MeshError {
    // Wire errors
    #[error("buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("device id out of range: {0}")]
    UnknownDevice(DeviceId),

    #[error("invalid route list: {0}")]
    InvalidRouteList(&'static str),

    #[error("payload size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    // Crypto errors
    #[error("authentication failed")]
    AuthFailed,

    #[error("cipher setup failed: {0}")]
    CipherSetup(&'static str),

    // Storage errors
    #[error("storage fault: {0}")]
    Storage(String),

    #[error("queue cursor out of bounds")]
    CursorOutOfBounds,

    // Radio / transport errors
    #[error("radio error: {0}")]
    Radio(String),

    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

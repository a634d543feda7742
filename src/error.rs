//! Error types for tuya-stub
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StubError
pub type Result<T> = std::result::Result<T, StubError>;

/// Unified error type for tuya-stub operations
#[derive(Debug, Error)]
pub enum StubError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Message Errors (abort one message, connection stays up)
    // -------------------------------------------------------------------------
    #[error("Device id mismatch: expected {expected:?}, got {actual:?}")]
    IdentityMismatch { expected: String, actual: String },

    #[error("Stale request: timestamp {timestamp} is more than {window}s from now ({now})")]
    StaleRequest { timestamp: i64, now: i64, window: i64 },

    // -------------------------------------------------------------------------
    // Frame Errors (discard one frame, keep decoding)
    // -------------------------------------------------------------------------
    #[error("Checksum mismatch: frame carries 0x{expected:08x}, computed 0x{actual:08x}")]
    Checksum { expected: u32, actual: u32 },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Connection Ownership Errors
    // -------------------------------------------------------------------------
    #[error("Connection rejected: {0}")]
    Busy(String),

    #[error("Engine is closed")]
    Closed,
}

impl StubError {
    /// True for errors that invalidate a single frame on the wire
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            StubError::Checksum { .. } | StubError::MalformedFrame(_) | StubError::Decryption(_)
        )
    }

    /// True for semantic errors the device refuses one message for
    pub fn is_message_error(&self) -> bool {
        matches!(
            self,
            StubError::IdentityMismatch { .. } | StubError::StaleRequest { .. }
        )
    }
}

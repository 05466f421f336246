//! Error types for framebridge

use std::time::Duration;
use thiserror::Error;

/// Result type alias for framebridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// framebridge error type
#[derive(Error, Debug)]
pub enum Error {
    // Ingest errors
    #[error("Buffer mapping failed: {0}")]
    Mapping(String),

    #[error("Invalid frame geometry: {width}x{height}")]
    InvalidGeometry { width: i32, height: i32 },

    #[error("Frame size changed after allocation: expected {expected} bytes, got {actual}")]
    GeometryMismatch { expected: usize, actual: usize },

    #[error("Ring slot {index} is still borrowed by a consumer")]
    SlotInUse { index: usize },

    // Resource errors
    #[error("Allocation failed: {0}")]
    Allocation(String),

    // Capture errors
    #[error("Timed out after {0:?} waiting for a frame")]
    Timeout(Duration),

    #[error("Latest frame was already consumed")]
    AlreadyConsumed,

    #[error("End of stream")]
    EndOfStream,

    // Conversion errors
    #[error("Colorspace conversion failed: {0}")]
    Conversion(String),

    #[error("Unsupported pixel depth: {0} bits per pixel")]
    UnsupportedDepth(u32),

    // Pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the caller can simply retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::AlreadyConsumed
                | Error::Mapping(_)
                | Error::InvalidGeometry { .. }
                | Error::GeometryMismatch { .. }
                | Error::SlotInUse { .. }
                | Error::Conversion(_)
                | Error::UnsupportedDepth(_)
        )
    }

    /// Check if this error ends frame delivery for the stream
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Allocation(_) | Error::Pipeline(_) | Error::EndOfStream
        )
    }
}

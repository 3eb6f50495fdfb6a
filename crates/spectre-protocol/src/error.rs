//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame exceeds maximum size
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame was not a valid message of the expected shape
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Binary frame payload was not UTF-8
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
}

//! Core error types for the Spectre agent

use std::path::PathBuf;
use thiserror::Error;

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Peer presented a wrong or missing token
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Handshake did not complete (missing, malformed or unexpected reply)
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Connection refused or dial failed
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Configured address cannot be turned into a URL
    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session has no live shell (never reset, or already closed)
    #[error("no active session: {0}")]
    NoActiveSession(String),

    /// PTY allocation or shell spawn failed
    #[error("PTY allocation failed: {0}")]
    PtyAllocation(String),

    /// Reading from or writing to the PTY failed
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

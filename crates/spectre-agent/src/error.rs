//! Errors that end a control channel

use spectre_core::{ConnectionError, SessionError};
use spectre_protocol::ProtocolError;
use thiserror::Error;

/// First failure reported by any loop attached to a control channel.
///
/// Every variant is fatal to the connection it occurred on and never to
/// the agent process.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Socket read or write failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer closed the socket
    #[error("connection closed by peer")]
    Closed,

    /// Frame could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// PTY spawn, read or write failed outside an intentional cancellation
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Handshake or dial failure
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The agent is shutting down
    #[error("agent shutting down")]
    Shutdown,
}

impl ChannelError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

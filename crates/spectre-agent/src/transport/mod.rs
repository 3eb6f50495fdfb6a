//! Message-oriented socket halves
//!
//! A control channel only needs to send and receive whole text frames. The
//! two traits here hide whether the socket came from the listening server
//! (axum upgrade) or from dialing out (tungstenite client), and let tests
//! drive a channel over an in-process pipe.

mod memory;
mod ws;

use async_trait::async_trait;

use crate::error::ChannelError;

pub use memory::{memory_pair, MemoryPeer};
pub use ws::{axum_socket, client_socket, connect};

/// Write half of a framed socket
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Best-effort close handshake
    async fn close(&mut self);
}

/// Read half of a framed socket
#[async_trait]
pub trait FrameStream: Send {
    /// Next data frame as text; `None` once the peer has closed.
    ///
    /// Control frames (ping/pong) are consumed internally. Binary frames
    /// are accepted when their payload is UTF-8.
    async fn next_text(&mut self) -> Option<Result<String, ChannelError>>;
}

pub type BoxedSink = Box<dyn FrameSink>;
pub type BoxedStream = Box<dyn FrameStream>;

//! Control channel: one authenticated socket and the loops attached to it

mod handshake;
mod heartbeat;
mod termination;
mod writer;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use spectre_protocol::{codec, AgentMessage, ControlMessage};

use crate::error::ChannelError;
use crate::transport::{BoxedSink, BoxedStream};

pub use heartbeat::spawn_heartbeat;
pub use termination::Termination;
pub use writer::ChannelWriter;

/// A socket between the agent and one controller.
///
/// Lives from a successful handshake until the first unrecoverable error;
/// a reconnect always builds a new one.
pub struct ControlChannel {
    writer: ChannelWriter,
    stream: BoxedStream,
    termination: Termination,
}

impl ControlChannel {
    /// Wrap socket halves. `shutdown` cancels the channel with the agent.
    pub fn new((sink, stream): (BoxedSink, BoxedStream), shutdown: &CancellationToken) -> Self {
        Self {
            writer: ChannelWriter::new(sink),
            stream,
            termination: Termination::child_of(shutdown),
        }
    }

    /// Server side: require the controller's `hello` and token, then ack
    pub async fn accept_handshake(
        &mut self,
        token: &str,
        ack: &AgentMessage,
        timeout: Duration,
    ) -> Result<(), ChannelError> {
        handshake::accept(&mut self.stream, &self.writer, token, ack, timeout).await
    }

    /// Client side: send our `hello` and require one back
    pub async fn dial_handshake(
        &mut self,
        hello: &AgentMessage,
        timeout: Duration,
    ) -> Result<(), ChannelError> {
        handshake::dial(&mut self.stream, &self.writer, hello, timeout).await
    }

    pub fn writer(&self) -> ChannelWriter {
        self.writer.clone()
    }

    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    /// Next inbound message. `None` once the channel has terminated.
    ///
    /// Transport failures, peer hang-up and undecodable frames settle the
    /// termination slot before returning `None`.
    pub async fn next_message(&mut self) -> Option<ControlMessage> {
        let frame = tokio::select! {
            biased;
            _ = self.termination.cancelled() => return None,
            frame = self.stream.next_text() => frame,
        };

        let result = match frame {
            Some(Ok(text)) => codec::decode(&text).map_err(ChannelError::from),
            Some(Err(e)) => Err(e),
            None => Err(ChannelError::Closed),
        };
        match result {
            Ok(message) => Some(message),
            Err(e) => {
                self.termination.fail(e);
                None
            }
        }
    }

    /// Close the socket
    pub async fn close(&mut self) {
        self.writer.close().await;
    }
}

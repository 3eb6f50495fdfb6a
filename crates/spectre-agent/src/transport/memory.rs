//! In-process transport
//!
//! Connects a control channel to a [`MemoryPeer`] that plays the controller,
//! without sockets. Used by tests and by embedders that host the agent
//! in-process.

use async_trait::async_trait;
use tokio::sync::mpsc;

use spectre_protocol::{codec, AgentMessage, ControlMessage};

use super::{BoxedSink, BoxedStream, FrameSink, FrameStream};
use crate::error::ChannelError;

/// Create a connected pair: channel halves for the agent, and the peer end
pub fn memory_pair() -> ((BoxedSink, BoxedStream), MemoryPeer) {
    let (to_peer, from_agent) = mpsc::unbounded_channel();
    let (to_agent, from_peer) = mpsc::unbounded_channel();

    let halves: (BoxedSink, BoxedStream) = (
        Box::new(MemorySink(Some(to_peer))),
        Box::new(MemoryStream(from_peer)),
    );
    let peer = MemoryPeer {
        tx: Some(to_agent),
        rx: from_agent,
    };
    (halves, peer)
}

struct MemorySink(Option<mpsc::UnboundedSender<String>>);

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        match &self.0 {
            Some(tx) => tx.send(text).map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    async fn close(&mut self) {
        self.0 = None;
    }
}

struct MemoryStream(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next_text(&mut self) -> Option<Result<String, ChannelError>> {
        self.0.recv().await.map(Ok)
    }
}

/// Controller end of an in-process channel
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Send a raw frame; false once the agent side is gone
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    /// Send a control message
    pub fn send(&self, message: &ControlMessage) -> bool {
        match codec::encode(message) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Next raw frame from the agent; `None` once the agent side closed
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next agent message, skipping frames that fail to decode
    pub async fn recv(&mut self) -> Option<AgentMessage> {
        loop {
            let text = self.rx.recv().await?;
            match codec::decode(&text) {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!("Dropping undecodable agent frame: {}", e),
            }
        }
    }

    /// Hang up, as a controller closing its socket would
    pub fn close(&mut self) {
        self.tx = None;
    }
}

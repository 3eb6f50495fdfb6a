//! Serialized write path

use std::sync::Arc;

use tokio::sync::Mutex;

use spectre_protocol::{codec, AgentMessage};

use crate::error::ChannelError;
use crate::transport::BoxedSink;

/// Shared handle to a channel's socket write half.
///
/// Dispatch replies, PTY output and heartbeats all write through clones of
/// this handle; the lock makes each frame go out whole and in send order.
#[derive(Clone)]
pub struct ChannelWriter {
    sink: Arc<Mutex<BoxedSink>>,
}

impl ChannelWriter {
    pub fn new(sink: BoxedSink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Encode and send one message
    pub async fn send(&self, message: &AgentMessage) -> Result<(), ChannelError> {
        let text = codec::encode(message)?;
        let mut sink = self.sink.lock().await;
        sink.send_text(text).await
    }

    /// Close the underlying socket
    pub async fn close(&self) {
        self.sink.lock().await.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_pair;
    use spectre_protocol::SessionId;

    #[tokio::test]
    async fn test_concurrent_writers_keep_frames_whole() {
        let ((sink, _stream), mut peer) = memory_pair();
        let writer = ChannelWriter::new(sink);

        let mut handles = Vec::new();
        for i in 0..8 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..10 {
                    let message = AgentMessage::Output {
                        data: format!("{}-{}", i, j),
                        session_id: SessionId::new(format!("s{}", i)),
                    };
                    writer.send(&message).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut last_seen = [None::<usize>; 8];
        for _ in 0..80 {
            let Some(AgentMessage::Output { data, .. }) = peer.recv().await else {
                panic!("expected output frame");
            };
            let (writer_id, seq) = data.split_once('-').unwrap();
            let writer_id: usize = writer_id.parse().unwrap();
            let seq: usize = seq.parse().unwrap();
            // Per-writer order is preserved.
            assert!(last_seen[writer_id].map_or(true, |prev| prev < seq));
            last_seen[writer_id] = Some(seq);
        }
    }

    #[tokio::test]
    async fn test_send_after_peer_gone_fails() {
        let ((sink, _stream), peer) = memory_pair();
        let writer = ChannelWriter::new(sink);
        drop(peer);

        let result = writer.send(&AgentMessage::Heartbeat).await;
        assert!(matches!(result, Err(ChannelError::Closed)));
    }
}

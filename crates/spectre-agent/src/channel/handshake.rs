//! Authentication handshake
//!
//! Whichever side dialed speaks first. An inbound controller must open with
//! `hello` carrying the shared token; the agent answers with its own
//! `hello`. When the agent dials out it sends its `hello` first and expects
//! one `hello` back.

use std::time::Duration;

use spectre_core::auth::validate_token;
use spectre_core::ConnectionError;
use spectre_protocol::{codec, AgentMessage, ControlMessage};

use super::ChannelWriter;
use crate::error::ChannelError;
use crate::transport::BoxedStream;

/// Read one frame within `timeout`
async fn read_frame(stream: &mut BoxedStream, timeout: Duration) -> Result<String, ChannelError> {
    match tokio::time::timeout(timeout, stream.next_text()).await {
        Ok(Some(Ok(text))) => Ok(text),
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Err(ChannelError::Closed),
        Err(_) => Err(ConnectionError::HandshakeFailed(format!(
            "no hello within {:?}",
            timeout
        ))
        .into()),
    }
}

/// Validate an inbound controller's `hello`, then acknowledge it.
///
/// Nothing is written on failure, so an unauthenticated peer learns only
/// that the socket closed. The presented token is never logged.
pub async fn accept(
    stream: &mut BoxedStream,
    writer: &ChannelWriter,
    expected_token: &str,
    ack: &AgentMessage,
    timeout: Duration,
) -> Result<(), ChannelError> {
    let text = read_frame(stream, timeout).await?;
    let message: ControlMessage = codec::decode(&text)
        .map_err(|_| ConnectionError::HandshakeFailed("malformed hello".to_string()))?;

    match message {
        ControlMessage::Hello { token } if validate_token(&token, expected_token) => {}
        ControlMessage::Hello { .. } => return Err(ConnectionError::AuthenticationFailed.into()),
        other => {
            return Err(ConnectionError::HandshakeFailed(format!(
                "expected hello, got {}",
                other.message_type()
            ))
            .into())
        }
    }

    writer.send(ack).await
}

/// Announce ourselves to a controller we dialed and wait for its `hello`
pub async fn dial(
    stream: &mut BoxedStream,
    writer: &ChannelWriter,
    hello: &AgentMessage,
    timeout: Duration,
) -> Result<(), ChannelError> {
    writer.send(hello).await?;

    let text = read_frame(stream, timeout).await?;
    let reply: serde_json::Value = serde_json::from_str(&text)
        .map_err(|_| ConnectionError::HandshakeFailed("malformed hello reply".to_string()))?;

    match reply.get("type").and_then(|t| t.as_str()) {
        Some("hello") => Ok(()),
        Some(other) => Err(ConnectionError::HandshakeFailed(format!(
            "expected hello reply, got {}",
            other
        ))
        .into()),
        None => Err(ConnectionError::HandshakeFailed("reply has no type".to_string()).into()),
    }
}

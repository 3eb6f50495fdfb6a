//! JSON frame encoding
//!
//! The transport (WebSocket) already delimits frames, so encoding is a
//! size-checked `serde_json` round trip: one message per text frame.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;

/// Largest frame accepted in either direction (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Encode a message as a single JSON text frame
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(message)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(text)
}

/// Decode a single JSON text frame
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AgentMessage, ControlMessage};
    use crate::session::SessionId;

    #[test]
    fn test_encode_output_frame() {
        let text = encode(&AgentMessage::Output {
            data: "ok".to_string(),
            session_id: SessionId::new("s1"),
        })
        .unwrap();
        assert_eq!(text, r#"{"type":"output","data":"ok","sessionId":"s1"}"#);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result: Result<ControlMessage, _> = decode("not json");
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));

        let result: Result<ControlMessage, _> = decode(r#"{"token":"missing type"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let huge = "x".repeat(MAX_FRAME_SIZE + 1);
        let result: Result<ControlMessage, _> = decode(&huge);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }
}

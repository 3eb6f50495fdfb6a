//! spectre-protocol: Wire protocol for the Spectre agent
//!
//! Messages are JSON objects, one per WebSocket frame, tagged by a `type`
//! field. [`ControlMessage`] flows from the controller to the agent and
//! [`AgentMessage`] flows back.

pub mod codec;
pub mod error;
pub mod message;
pub mod session;

pub use codec::{decode, encode, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{AgentMessage, Container, ControlMessage, Fingerprint, NetworkInfo, SystemInfo};
pub use session::SessionId;

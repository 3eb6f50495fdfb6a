//! spectre-agent: remote-control agent
//!
//! Exposes interactive PTY shell sessions, plus container and host
//! inventory queries, over a single WebSocket control channel. The agent
//! listens for controllers and can also dial one out, redialing with
//! backoff whenever the connection drops.

pub mod channel;
pub mod connection;
pub mod error;
pub mod multiplexer;
pub mod probe;
pub mod pty;
pub mod reconnect;
pub mod server;
pub mod service;
pub mod state;
pub mod transport;

pub use channel::ControlChannel;
pub use error::ChannelError;
pub use multiplexer::SessionMultiplexer;
pub use probe::LocalProbe;
pub use reconnect::{run_client, ExponentialBackoff};
pub use state::{AgentIdentity, AgentState};

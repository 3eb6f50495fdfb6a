//! spectre-core: configuration, identity and host abstractions for the Spectre agent
//!
//! This crate holds everything the agent needs that is not tied to a live
//! connection: the TOML configuration, the persisted device identity and
//! host fingerprint, token checks, endpoint URL rules, the single-instance
//! lock, and the traits behind which host inventory is collected.

pub mod auth;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod instance;
pub mod net;
pub mod traits;

pub use error::{ConfigError, ConnectionError, SessionError};
pub use traits::{HostProbe, ProcessProbe};

/// Version reported in the handshake and health endpoint
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

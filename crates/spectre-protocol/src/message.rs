//! Message types for the Spectre protocol
//!
//! Every frame is a JSON object carrying a `type` discriminator. Each enum
//! variant maps to exactly one `type` value and carries only the fields that
//! type uses; unset optional fields are omitted from the wire.
//!
//! # Message Flow
//!
//! 1. Handshake: the dialing side speaks first. A controller dialing the agent
//!    sends `hello` with the shared token; the agent acknowledges with its own
//!    `hello`. When the agent dials out, the order is reversed.
//! 2. The controller sends `reset` to (re)start the shell of a session, then
//!    `keystroke` frames carrying input for it.
//! 3. The agent streams `output` frames tagged with the session id and emits
//!    `heartbeat` frames on a fixed interval.
//! 4. `dockerInfo` and `systemInfo` are request/response queries; the reply
//!    carries either the payload or `error`.

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Messages the agent receives from the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    /// Handshake carrying the shared secret
    Hello {
        #[serde(default)]
        token: String,
    },

    /// Raw terminal input for a session
    Keystroke {
        #[serde(default)]
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },

    /// Start (or restart) the shell behind a session
    Reset {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },

    /// Query running containers
    DockerInfo,

    /// Query host hardware/OS and network inventory
    SystemInfo,

    /// Any `type` this agent does not understand
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Wire name of this message's `type`
    pub fn message_type(&self) -> &'static str {
        match self {
            ControlMessage::Hello { .. } => "hello",
            ControlMessage::Keystroke { .. } => "keystroke",
            ControlMessage::Reset { .. } => "reset",
            ControlMessage::DockerInfo => "dockerInfo",
            ControlMessage::SystemInfo => "systemInfo",
            ControlMessage::Unknown => "unknown",
        }
    }

    /// Target session, with absent or empty ids resolved to the default session
    pub fn session_id(&self) -> SessionId {
        match self {
            ControlMessage::Keystroke { session_id, .. } | ControlMessage::Reset { session_id } => {
                SessionId::resolve(session_id.as_ref().map(SessionId::as_str))
            }
            _ => SessionId::default_session(),
        }
    }
}

/// Messages the agent sends to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AgentMessage {
    /// Handshake identifying the agent
    Hello {
        agent_id: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        agent_version: String,
        fingerprint: Fingerprint,
    },

    /// Terminal output from a session
    Output {
        data: String,
        session_id: SessionId,
    },

    /// Liveness ping
    Heartbeat,

    /// Reply to a `dockerInfo` query
    DockerInfo {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        containers: Vec<Container>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Reply to a `systemInfo` query
    SystemInfo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_info: Option<SystemInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        network_info: Option<NetworkInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl AgentMessage {
    /// Wire name of this message's `type`
    pub fn message_type(&self) -> &'static str {
        match self {
            AgentMessage::Hello { .. } => "hello",
            AgentMessage::Output { .. } => "output",
            AgentMessage::Heartbeat => "heartbeat",
            AgentMessage::DockerInfo { .. } => "dockerInfo",
            AgentMessage::SystemInfo { .. } => "systemInfo",
        }
    }

    /// Build a `dockerInfo` reply from a listing result
    pub fn docker_info(result: Result<Vec<Container>, String>) -> Self {
        match result {
            Ok(containers) => AgentMessage::DockerInfo {
                containers,
                error: None,
            },
            Err(error) => AgentMessage::DockerInfo {
                containers: Vec::new(),
                error: Some(error),
            },
        }
    }

    /// Build a `systemInfo` reply from an inventory result
    pub fn system_info(result: Result<(SystemInfo, NetworkInfo), String>) -> Self {
        match result {
            Ok((system_info, network_info)) => AgentMessage::SystemInfo {
                system_info: Some(system_info),
                network_info: Some(network_info),
                error: None,
            },
            Err(error) => AgentMessage::SystemInfo {
                system_info: None,
                network_info: None,
                error: Some(error),
            },
        }
    }
}

/// Stable identity of the host the agent runs on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_id: String,
    #[serde(default)]
    pub mac_addresses: Vec<String>,
    #[serde(default)]
    pub nics: Vec<String>,
    /// Hex digest over the fields above
    pub fingerprint: String,
}

/// A running container and its published ports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

/// Static hardware and OS inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    pub arch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,
    pub cores: usize,
    pub memory_bytes: u64,
    pub disk_total_bytes: u64,
    pub disk_free_bytes: u64,
}

/// Addresses of up, non-loopback interfaces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv4: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv6: Vec<String>,
}

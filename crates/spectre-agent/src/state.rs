//! Agent-wide state shared by every connection

use std::io;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use spectre_core::config::AgentConfig;
use spectre_core::identity::{collect_fingerprint, ensure_device_info};
use spectre_core::{HostProbe, AGENT_VERSION};
use spectre_protocol::{AgentMessage, Fingerprint};

use crate::pty::ShellCommand;

/// Who this agent is
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    /// Reported in `hello`; the persisted device id
    pub agent_id: String,
    pub device_id: String,
    pub fingerprint: Fingerprint,
}

impl AgentIdentity {
    /// Load the persisted device id (creating it on first run) and
    /// fingerprint the host
    pub fn load() -> io::Result<Self> {
        let device = ensure_device_info()?;
        Ok(Self::new(device.device_id, collect_fingerprint()))
    }

    pub fn new(device_id: String, fingerprint: Fingerprint) -> Self {
        Self {
            agent_id: device_id.clone(),
            device_id,
            fingerprint,
        }
    }
}

/// Global state for the agent daemon
pub struct AgentState {
    pub config: AgentConfig,
    pub identity: AgentIdentity,
    pub shell: Arc<ShellCommand>,
    pub probe: Arc<dyn HostProbe>,
    /// Cancelled on SIGINT/SIGTERM; every channel is a child of it
    pub shutdown: CancellationToken,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub agent_id: String,
    pub device_id: String,
    pub agent_version: String,
    pub fingerprint: Fingerprint,
}

impl AgentState {
    pub fn new(config: AgentConfig, identity: AgentIdentity, probe: Arc<dyn HostProbe>) -> Self {
        let shell = Arc::new(ShellCommand::from_config(&config));
        Self {
            config,
            identity,
            shell,
            probe,
            shutdown: CancellationToken::new(),
        }
    }

    /// Our `hello`, used both as the server ack and as the client greeting
    pub fn hello(&self) -> AgentMessage {
        AgentMessage::Hello {
            agent_id: self.identity.agent_id.clone(),
            agent_version: AGENT_VERSION.to_string(),
            fingerprint: self.identity.fingerprint.clone(),
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            agent_id: self.identity.agent_id.clone(),
            device_id: self.identity.device_id.clone(),
            agent_version: AGENT_VERSION.to_string(),
            fingerprint: self.identity.fingerprint.clone(),
        }
    }
}

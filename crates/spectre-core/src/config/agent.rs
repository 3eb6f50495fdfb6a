//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backoff::BackoffConfig;
use super::serde_utils::duration_secs;
use crate::auth::DEFAULT_TOKEN;
use crate::error::ConfigError;

/// Configuration for the agent daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address the WebSocket server binds to (`:8081` binds every interface)
    pub listen: String,

    /// Shared secret a controller must present in its `hello`
    pub token: String,

    /// Controller to dial out to, in addition to listening
    pub host: Option<String>,

    /// Shell to spawn (falls back to `$SHELL`, then `/bin/bash`)
    pub default_shell: Option<String>,

    /// Extra environment variables for spawned shells
    pub default_env: Vec<(String, String)>,

    /// Initial PTY dimensions
    pub terminal: TerminalConfig,

    /// Interval between outbound heartbeats
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// How long an inbound peer has to send its `hello`
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Bound on container and inventory queries
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: ":8081".to_string(),
            token: DEFAULT_TOKEN.to_string(),
            host: None,
            default_shell: None,
            default_env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            terminal: TerminalConfig::default(),
            heartbeat_interval: Duration::from_secs(25),
            handshake_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            backoff: BackoffConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Reject values the timers and backoff cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("handshake_timeout", self.handshake_timeout),
            ("probe_timeout", self.probe_timeout),
            ("backoff.initial", self.backoff.initial),
            ("backoff.max", self.backoff.max),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }

        let multiplier = self.backoff.multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff.multiplier must be at least 1.0, got {}",
                multiplier
            )));
        }
        let jitter = self.backoff.jitter;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff.jitter must be between 0.0 and 1.0, got {}",
                jitter
            )));
        }

        if self.terminal.rows == 0 || self.terminal.cols == 0 {
            return Err(ConfigError::Invalid("terminal size must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Resolve the shell binary to spawn for new sessions
    pub fn shell(&self) -> String {
        self.default_shell
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| {
                if cfg!(windows) {
                    "cmd.exe".to_string()
                } else {
                    "/bin/bash".to_string()
                }
            })
    }
}

/// PTY dimensions used when spawning a shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

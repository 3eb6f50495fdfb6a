//! PTY-backed shell sessions
//!
//! A [`PtySession`] is a named slot that holds at most one live
//! [`Generation`] at a time. `reset` swaps in a fresh generation and retires
//! the previous one; the output reader of each generation watches that
//! generation's own cancellation token, so it can never read from a
//! successor.

mod generation;
mod reader;
mod session;

use std::path::{Path, PathBuf};

use spectre_core::config::{AgentConfig, TerminalConfig};
use spectre_core::SessionError;

pub use generation::{Generation, OutputChunk};
pub use reader::{spawn_output_reader, Utf8Chunker};
pub use session::{PtySession, SessionStatus};

/// How to start a session's shell
#[derive(Debug, Clone)]
pub struct ShellCommand {
    /// Shell binary, absolute or looked up on `PATH`
    pub program: String,
    /// Environment applied on top of the agent's own
    pub env: Vec<(String, String)>,
    /// Initial PTY dimensions
    pub size: TerminalConfig,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            size: TerminalConfig::default(),
        }
    }

    /// Shell described by the agent configuration
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            program: config.shell(),
            env: config.default_env.clone(),
            size: config.terminal,
        }
    }

    /// Confirm the shell binary exists.
    ///
    /// Every session needs it, so the agent checks once at startup rather
    /// than failing on the first `reset`.
    pub fn validate(&self) -> Result<PathBuf, SessionError> {
        resolve_program(&self.program).ok_or_else(|| {
            SessionError::PtyAllocation(format!("shell '{}' not found", self.program))
        })
    }
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

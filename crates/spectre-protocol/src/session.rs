//! Session identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a logical terminal session within one control channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Id used when the controller omits `sessionId` or sends it empty
    pub const DEFAULT: &'static str = "default";

    /// Create a new session ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The well-known default session
    pub fn default_session() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Resolve an optional wire value, mapping absent or empty ids to the default session
    pub fn resolve(raw: Option<&str>) -> Self {
        match raw {
            Some(id) if !id.is_empty() => Self::new(id),
            _ => Self::default_session(),
        }
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::default_session()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

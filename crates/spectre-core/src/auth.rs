//! Shared-token authentication
//!
//! A controller proves it may drive this agent by presenting the shared
//! token in its `hello`. Comparison runs over SHA-256 digests so the time
//! taken does not depend on where, or whether, the lengths differ.

use sha2::{Digest, Sha256};

/// Token configured by default; accepted, but warned about at startup
pub const DEFAULT_TOKEN: &str = "changeme";

/// Check a presented token against the configured one
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());

    let mut diff = 0u8;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Whether the configured token is the well-known default
pub fn is_default_token(token: &str) -> bool {
    token == DEFAULT_TOKEN
}

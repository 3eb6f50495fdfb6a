//! WebSocket URL construction
//!
//! Two directions need a URL: the dial target when the agent connects out
//! to a controller, and the address printed at startup that a controller can
//! use to reach this agent's listener.

use url::Url;

use crate::error::ConnectionError;
use crate::net;

/// Path used when the configured controller address has none
pub const DEFAULT_REGISTER_PATH: &str = "/agents/register";

/// Path the listening server accepts WebSocket upgrades on
pub const AGENT_WS_PATH: &str = "/ws";

/// Normalize a controller address into the URL the agent dials.
///
/// Bare `host[:port]` values get a `ws://` scheme, `http`/`https` map to
/// `ws`/`wss`, an empty path becomes [`DEFAULT_REGISTER_PATH`], and `token`
/// is appended as a query parameter unless one is already present.
pub fn build_dial_url(host: &str, token: &str) -> Result<Url, ConnectionError> {
    let invalid = |reason: String| ConnectionError::InvalidAddress {
        address: host.to_string(),
        reason,
    };

    let trimmed = host.trim();
    if trimmed.is_empty() {
        return Err(invalid("address is empty".to_string()));
    }

    let raw = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("ws://{}", trimmed)
    };
    let mut url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme {:?}", other))),
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch scheme to {}", scheme)))?;
    }

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_REGISTER_PATH);
    }

    let has_token = url.query_pairs().any(|(k, v)| k == "token" && !v.is_empty());
    if !has_token {
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "token")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair("token", token);
    }

    Ok(url)
}

/// URL a controller can dial to reach an agent listening on `listen`.
///
/// Wildcard binds (`:8081`, `0.0.0.0:8081`, `[::]:8081`) are replaced with
/// the first non-loopback IPv4 address, or `localhost` when there is none.
pub fn build_connection_url(listen: &str) -> String {
    build_connection_url_with(listen, net::first_non_loopback_ipv4)
}

fn build_connection_url_with(listen: &str, local_ip: impl FnOnce() -> Option<String>) -> String {
    let Some((host, port)) = split_host_port(listen) else {
        return format!("ws://{}{}", listen.trim_start_matches(':'), AGENT_WS_PATH);
    };

    let host = if host.is_empty() || host == "0.0.0.0" || host == "::" {
        local_ip().unwrap_or_else(|| "localhost".to_string())
    } else {
        host.to_string()
    };

    if host.contains(':') {
        format!("ws://[{}]:{}{}", host, port, AGENT_WS_PATH)
    } else {
        format!("ws://{}:{}{}", host, port, AGENT_WS_PATH)
    }
}

/// Split `host:port`, `[v6]:port` or `:port`; `None` when malformed
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

/// Turn a host-less listen address (`:8081`) into something `bind` accepts
pub fn bind_address(listen: &str) -> String {
    match split_host_port(listen) {
        Some(("", port)) => format!("0.0.0.0:{}", port),
        Some((host, port)) if host.contains(':') => format!("[{}]:{}", host, port),
        _ => listen.to_string(),
    }
}

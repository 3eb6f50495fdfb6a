//! Host inventory collaborator

use async_trait::async_trait;

use spectre_protocol::{Container, NetworkInfo, SystemInfo};

/// Answers the request/response queries a controller can make.
///
/// Implementations may block on external commands; callers bound each
/// call with a timeout, and errors are reported to the controller inline
/// rather than ending the connection.
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Running containers and their published ports
    async fn list_containers(&self) -> anyhow::Result<Vec<Container>>;

    /// Hardware and OS inventory
    async fn system_info(&self) -> anyhow::Result<SystemInfo>;

    /// Addresses of non-loopback interfaces
    async fn network_info(&self) -> anyhow::Result<NetworkInfo>;
}

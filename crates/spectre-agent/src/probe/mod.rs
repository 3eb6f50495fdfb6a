//! Host probes answering `dockerInfo` and `systemInfo`

mod docker;
mod system;

use anyhow::Context;
use async_trait::async_trait;

use spectre_core::{net, HostProbe};
use spectre_protocol::{Container, NetworkInfo, SystemInfo};

pub use docker::parse_ps_output;
pub use system::collect_system_info;

/// Probes the machine the agent runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProbe;

#[async_trait]
impl HostProbe for LocalProbe {
    async fn list_containers(&self) -> anyhow::Result<Vec<Container>> {
        docker::list_containers().await
    }

    async fn system_info(&self) -> anyhow::Result<SystemInfo> {
        tokio::task::spawn_blocking(collect_system_info)
            .await
            .context("system inventory task failed")
    }

    async fn network_info(&self) -> anyhow::Result<NetworkInfo> {
        tokio::task::spawn_blocking(net::collect_network_info)
            .await
            .context("network inventory task failed")
    }
}

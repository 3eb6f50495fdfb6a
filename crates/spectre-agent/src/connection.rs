//! Per-connection lifecycle
//!
//! Once a channel is authenticated the same sequence runs regardless of
//! who dialed: bind a fresh multiplexer to it, start the heartbeat, dispatch
//! inbound messages until any loop fails, then close every session and the
//! socket.

use std::sync::Arc;

use crate::channel::{spawn_heartbeat, ControlChannel};
use crate::error::ChannelError;
use crate::multiplexer::{ResetHook, SessionMultiplexer};
use crate::pty::spawn_output_reader;
use crate::state::AgentState;

/// Run an authenticated channel to completion and return the error that
/// ended it
pub async fn run_channel(mut channel: ControlChannel, state: Arc<AgentState>) -> ChannelError {
    let writer = channel.writer();
    let termination = channel.termination().clone();

    let on_reset: ResetHook = {
        let writer = writer.clone();
        let termination = termination.clone();
        Arc::new(move |session_id, generation| {
            let number = generation.number();
            let reader = spawn_output_reader(
                session_id.clone(),
                generation,
                writer.clone(),
                termination.clone(),
            );
            if reader.is_none() {
                tracing::error!(
                    "Session {} generation {} has no output reader",
                    session_id,
                    number
                );
            }
        })
    };
    let multiplexer = SessionMultiplexer::new(
        Arc::clone(&state.shell),
        writer.clone(),
        Arc::clone(&state.probe),
        state.config.probe_timeout,
        on_reset,
    );
    let heartbeat = spawn_heartbeat(writer, state.config.heartbeat_interval, termination.clone());

    while let Some(message) = channel.next_message().await {
        tracing::trace!("Dispatching {}", message.message_type());
        if let Err(e) = multiplexer.dispatch(message).await {
            termination.fail(e);
            break;
        }
    }

    let error = termination.wait().await;
    multiplexer.close_all();
    if let Err(e) = heartbeat.await {
        tracing::debug!("Heartbeat task ended abnormally: {}", e);
    }
    channel.close().await;
    error
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use spectre_core::config::AgentConfig;
    use spectre_core::HostProbe;
    use spectre_protocol::{
        AgentMessage, Container, ControlMessage, Fingerprint, NetworkInfo, SessionId, SystemInfo,
    };
    use tokio_util::sync::CancellationToken;

    use crate::state::AgentIdentity;
    use crate::transport::memory_pair;

    struct NoDocker;

    #[async_trait]
    impl HostProbe for NoDocker {
        async fn list_containers(&self) -> anyhow::Result<Vec<Container>> {
            anyhow::bail!("docker ps failed: executable not found")
        }

        async fn system_info(&self) -> anyhow::Result<SystemInfo> {
            Ok(SystemInfo::default())
        }

        async fn network_info(&self) -> anyhow::Result<NetworkInfo> {
            Ok(NetworkInfo::default())
        }
    }

    fn state() -> Arc<AgentState> {
        let config = AgentConfig {
            default_shell: Some("/bin/sh".to_string()),
            ..Default::default()
        };
        let identity = AgentIdentity::new("device-1".to_string(), Fingerprint::default());
        Arc::new(AgentState::new(config, identity, Arc::new(NoDocker)))
    }

    #[tokio::test]
    async fn test_peer_hangup_ends_channel() {
        let (halves, mut peer) = memory_pair();
        let channel = ControlChannel::new(halves, &CancellationToken::new());
        let task = tokio::spawn(run_channel(channel, state()));

        peer.close();
        let error = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(error, ChannelError::Closed));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_fatal() {
        let (halves, peer) = memory_pair();
        let channel = ControlChannel::new(halves, &CancellationToken::new());
        let task = tokio::spawn(run_channel(channel, state()));

        peer.send_text("{{{");
        let error = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(error, ChannelError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_bad_keystroke_and_failed_query_keep_channel_open() {
        let (halves, mut peer) = memory_pair();
        let channel = ControlChannel::new(halves, &CancellationToken::new());
        let termination = channel.termination().clone();
        let task = tokio::spawn(run_channel(channel, state()));

        peer.send(&ControlMessage::Keystroke {
            data: "x".to_string(),
            session_id: Some(SessionId::new("nope")),
        });
        peer.send(&ControlMessage::DockerInfo);

        let reply = tokio::time::timeout(Duration::from_secs(5), peer.recv())
            .await
            .unwrap()
            .unwrap();
        match reply {
            AgentMessage::DockerInfo { containers, error } => {
                assert!(containers.is_empty());
                assert!(error.unwrap().contains("docker ps failed"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!termination.is_terminated());

        peer.close();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let shutdown = CancellationToken::new();
        let (halves, mut peer) = memory_pair();
        let channel = ControlChannel::new(halves, &shutdown);
        let task = tokio::spawn(run_channel(channel, state()));

        peer.send(&ControlMessage::Reset {
            session_id: Some(SessionId::new("s1")),
        });
        peer.send(&ControlMessage::Keystroke {
            data: "echo ready\n".to_string(),
            session_id: Some(SessionId::new("s1")),
        });
        let first = tokio::time::timeout(Duration::from_secs(10), peer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.message_type(), "output");

        shutdown.cancel();
        let error = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(error, ChannelError::Shutdown));
    }
}

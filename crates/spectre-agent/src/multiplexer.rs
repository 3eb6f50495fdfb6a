//! Session multiplexer: routes inbound messages to named PTY sessions

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use spectre_core::{HostProbe, SessionError};
use spectre_protocol::{AgentMessage, ControlMessage, SessionId};

use crate::channel::ChannelWriter;
use crate::error::ChannelError;
use crate::pty::{Generation, PtySession, ShellCommand};

/// Called after every successful `reset` with the new generation, to
/// attach its output reader
pub type ResetHook = Arc<dyn Fn(SessionId, Arc<Generation>) + Send + Sync>;

/// Owns the sessions of one control channel.
///
/// The map lock is held only for lookup and insert. Sessions are driven
/// through their own locks, so a slow `reset` on one session never blocks
/// routing to another or teardown.
pub struct SessionMultiplexer {
    sessions: Mutex<HashMap<SessionId, Arc<PtySession>>>,
    shell: Arc<ShellCommand>,
    writer: ChannelWriter,
    probe: Arc<dyn HostProbe>,
    probe_timeout: Duration,
    on_reset: ResetHook,
}

impl SessionMultiplexer {
    pub fn new(
        shell: Arc<ShellCommand>,
        writer: ChannelWriter,
        probe: Arc<dyn HostProbe>,
        probe_timeout: Duration,
        on_reset: ResetHook,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            shell,
            writer,
            probe,
            probe_timeout,
            on_reset,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<PtySession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<PtySession>> {
        self.sessions().get(id).cloned()
    }

    fn get_or_create(&self, id: &SessionId) -> Arc<PtySession> {
        let mut sessions = self.sessions();
        let session = sessions.entry(id.clone()).or_insert_with(|| {
            tracing::debug!("Creating session {}", id);
            Arc::new(PtySession::new(id.clone(), Arc::clone(&self.shell)))
        });
        Arc::clone(session)
    }

    /// Number of sessions ever referenced on this channel
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Handle one inbound message.
    ///
    /// An `Err` is fatal to the channel: a PTY that cannot be spawned or
    /// written, or a reply that cannot be sent. Keystrokes for missing or
    /// idle sessions and failed queries are not errors.
    pub async fn dispatch(&self, message: ControlMessage) -> Result<(), ChannelError> {
        match message {
            ControlMessage::Keystroke { ref data, .. } => {
                let id = message.session_id();
                let Some(session) = self.get(&id) else {
                    tracing::debug!("Dropping keystroke for unknown session {}", id);
                    return Ok(());
                };
                match session.write(data.as_bytes()) {
                    Ok(()) => Ok(()),
                    Err(SessionError::NoActiveSession(_)) => {
                        tracing::debug!("Dropping keystroke for inactive session {}", id);
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }

            ControlMessage::Reset { .. } => {
                let id = message.session_id();
                let session = self.get_or_create(&id);
                let generation = session.reset()?;
                (self.on_reset)(id, generation);
                Ok(())
            }

            ControlMessage::DockerInfo => {
                let probe = Arc::clone(&self.probe);
                let result = self
                    .query("container listing", async move { probe.list_containers().await })
                    .await;
                self.writer.send(&AgentMessage::docker_info(result)).await
            }

            ControlMessage::SystemInfo => {
                let probe = Arc::clone(&self.probe);
                let result = self
                    .query("system inventory", async move {
                        let system = probe.system_info().await?;
                        let network = probe.network_info().await?;
                        Ok::<_, anyhow::Error>((system, network))
                    })
                    .await;
                self.writer.send(&AgentMessage::system_info(result)).await
            }

            ControlMessage::Hello { .. } => {
                tracing::debug!("Ignoring hello after handshake");
                Ok(())
            }

            ControlMessage::Unknown => {
                tracing::debug!("Ignoring message of unknown type");
                Ok(())
            }
        }
    }

    /// Run a collaborator query under the probe timeout, flattening any
    /// failure to the string sent back in `error`
    async fn query<T, F>(&self, what: &str, fut: F) -> Result<T, String>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.probe_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!("{} failed: {:#}", what, e);
                Err(format!("{:#}", e))
            }
            Err(_) => {
                tracing::warn!("{} timed out after {:?}", what, self.probe_timeout);
                Err(format!("{} timed out after {:?}", what, self.probe_timeout))
            }
        }
    }

    /// Stop every session.
    ///
    /// The map is emptied under its lock and each session is closed after
    /// the lock is released.
    pub fn close_all(&self) {
        let sessions: Vec<Arc<PtySession>> = self.sessions().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use spectre_protocol::{Container, NetworkInfo, SystemInfo};

    use crate::pty::SessionStatus;
    use crate::transport::{memory_pair, MemoryPeer};

    struct StubProbe {
        docker_fails: bool,
        hang: bool,
    }

    #[async_trait]
    impl HostProbe for StubProbe {
        async fn list_containers(&self) -> anyhow::Result<Vec<Container>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.docker_fails {
                anyhow::bail!("docker ps failed: command not found");
            }
            Ok(vec![Container {
                name: "web".to_string(),
                ports: vec!["0.0.0.0:80->80/tcp".to_string()],
            }])
        }

        async fn system_info(&self) -> anyhow::Result<SystemInfo> {
            Ok(SystemInfo {
                os: "linux".to_string(),
                cores: 2,
                ..Default::default()
            })
        }

        async fn network_info(&self) -> anyhow::Result<NetworkInfo> {
            Ok(NetworkInfo::default())
        }
    }

    fn multiplexer(probe: StubProbe) -> (SessionMultiplexer, MemoryPeer, Arc<AtomicUsize>) {
        let ((sink, _stream), peer) = memory_pair();
        let resets = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resets);
        let hook: ResetHook = Arc::new(move |_id, _generation| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mux = SessionMultiplexer::new(
            Arc::new(ShellCommand::new("/bin/sh")),
            ChannelWriter::new(sink),
            Arc::new(probe),
            Duration::from_secs(3),
            hook,
        );
        (mux, peer, resets)
    }

    fn ok_probe() -> StubProbe {
        StubProbe {
            docker_fails: false,
            hang: false,
        }
    }

    #[tokio::test]
    async fn test_keystroke_to_unknown_session_is_dropped() {
        let (mux, _peer, _) = multiplexer(ok_probe());
        let result = mux
            .dispatch(ControlMessage::Keystroke {
                data: "x".to_string(),
                session_id: Some(SessionId::new("nope")),
            })
            .await;
        assert!(result.is_ok());
        assert!(mux.is_empty());
    }

    #[tokio::test]
    async fn test_docker_failure_yields_single_error_reply() {
        let (mux, mut peer, _) = multiplexer(StubProbe {
            docker_fails: true,
            hang: false,
        });
        mux.dispatch(ControlMessage::DockerInfo).await.unwrap();

        match peer.recv().await.unwrap() {
            AgentMessage::DockerInfo { containers, error } => {
                assert!(containers.is_empty());
                assert_eq!(error.as_deref(), Some("docker ps failed: command not found"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_docker_success_reply() {
        let (mux, mut peer, _) = multiplexer(ok_probe());
        mux.dispatch(ControlMessage::DockerInfo).await.unwrap();

        let reply = peer.recv().await.unwrap();
        assert_eq!(
            reply,
            AgentMessage::DockerInfo {
                containers: vec![Container {
                    name: "web".to_string(),
                    ports: vec!["0.0.0.0:80->80/tcp".to_string()],
                }],
                error: None,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out_into_error_reply() {
        let (mux, mut peer, _) = multiplexer(StubProbe {
            docker_fails: false,
            hang: true,
        });
        mux.dispatch(ControlMessage::DockerInfo).await.unwrap();

        let Some(AgentMessage::DockerInfo { error, .. }) = peer.recv().await else {
            panic!("expected dockerInfo reply");
        };
        assert!(error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_system_info_reply_carries_both_records() {
        let (mux, mut peer, _) = multiplexer(ok_probe());
        mux.dispatch(ControlMessage::SystemInfo).await.unwrap();

        let Some(AgentMessage::SystemInfo {
            system_info,
            network_info,
            error,
        }) = peer.recv().await
        else {
            panic!("expected systemInfo reply");
        };
        assert_eq!(system_info.unwrap().cores, 2);
        assert!(network_info.is_some());
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_reply_write_failure_is_fatal() {
        let (mux, peer, _) = multiplexer(ok_probe());
        drop(peer);
        let result = mux.dispatch(ControlMessage::DockerInfo).await;
        assert!(matches!(result, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_unknown_and_late_hello_are_ignored() {
        let (mux, _peer, _) = multiplexer(ok_probe());
        assert!(mux.dispatch(ControlMessage::Unknown).await.is_ok());
        assert!(mux
            .dispatch(ControlMessage::Hello {
                token: "x".to_string()
            })
            .await
            .is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reset_creates_session_and_invokes_hook() {
        let (mux, _peer, resets) = multiplexer(ok_probe());
        mux.dispatch(ControlMessage::Reset {
            session_id: Some(SessionId::new("s1")),
        })
        .await
        .unwrap();
        mux.dispatch(ControlMessage::Reset { session_id: None })
            .await
            .unwrap();

        assert_eq!(mux.len(), 2);
        assert_eq!(resets.load(Ordering::SeqCst), 2);
        let default = mux.get(&SessionId::default_session()).unwrap();
        assert_eq!(default.status(), SessionStatus::Active);

        mux.close_all();
        assert!(mux.is_empty());
        assert_eq!(default.status(), SessionStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_keystroke_to_stopped_session_is_dropped() {
        let (mux, _peer, _) = multiplexer(ok_probe());
        mux.dispatch(ControlMessage::Reset {
            session_id: Some(SessionId::new("s1")),
        })
        .await
        .unwrap();
        let session = mux.get(&SessionId::new("s1")).unwrap();
        session.close();

        let result = mux
            .dispatch(ControlMessage::Keystroke {
                data: "ls\n".to_string(),
                session_id: Some(SessionId::new("s1")),
            })
            .await;
        assert!(result.is_ok());
    }
}

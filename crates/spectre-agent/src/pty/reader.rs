//! Output reader: PTY chunks to `output` frames

use std::sync::Arc;

use tokio::task::JoinHandle;

use spectre_core::SessionError;
use spectre_protocol::{AgentMessage, SessionId};

use super::Generation;
use crate::channel::{ChannelWriter, Termination};

/// Forward one generation's output to the channel until that generation is
/// retired or the channel terminates.
///
/// Cancellation is checked before every send, so a retired generation never
/// emits another frame. A read failure that was not preceded by
/// cancellation (the shell exited on its own) settles the channel's
/// termination slot.
///
/// Returns `None` when the generation's output was already taken by
/// another reader.
#[must_use = "a reader that was not started leaves the session's output unread"]
pub fn spawn_output_reader(
    session_id: SessionId,
    generation: Arc<Generation>,
    writer: ChannelWriter,
    termination: Termination,
) -> Option<JoinHandle<()>> {
    let Some(mut output) = generation.take_output() else {
        tracing::warn!(
            "Generation {} of session {} already has a reader",
            generation.number(),
            session_id
        );
        return None;
    };
    let cancel = generation.cancel_token();

    Some(tokio::spawn(async move {
        let mut chunker = Utf8Chunker::default();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = termination.cancelled() => break,
                chunk = output.recv() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    let Some(data) = chunker.push(&bytes) else {
                        continue;
                    };
                    if cancel.is_cancelled() {
                        break;
                    }
                    let message = AgentMessage::Output {
                        data,
                        session_id: session_id.clone(),
                    };
                    if let Err(e) = writer.send(&message).await {
                        termination.fail(e);
                        break;
                    }
                }
                Some(Err(e)) => {
                    if cancel.is_cancelled() {
                        tracing::debug!("Session {} reader stopped: {}", session_id, e);
                    } else {
                        tracing::info!("Session {} shell ended: {}", session_id, e);
                        termination.fail(SessionError::Io(e).into());
                    }
                    break;
                }
                None => {
                    if !cancel.is_cancelled() {
                        termination.fail(
                            SessionError::Io(std::io::Error::other("PTY output closed")).into(),
                        );
                    }
                    break;
                }
            }
        }
        tracing::debug!(
            "Reader for session {} generation {} exiting",
            session_id,
            generation.number()
        );
    }))
}

/// Turns raw PTY bytes into text without splitting multi-byte characters.
///
/// An incomplete UTF-8 sequence at the end of a chunk is held back and
/// completed by the next one. Bytes that can never form a character become
/// U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    /// Feed a chunk; returns the text that is complete so far, if any
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        // Truncated sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }

        (!text.is_empty()).then_some(text)
    }
}


#[cfg(all(test, unix))]
mod reader_tests {
    use super::*;
    use std::time::Duration;

    use crate::error::ChannelError;
    use crate::pty::{PtySession, ShellCommand};
    use crate::transport::memory_pair;

    async fn next_output(peer: &mut crate::transport::MemoryPeer) -> Option<(String, String)> {
        loop {
            match peer.recv().await? {
                AgentMessage::Output { data, session_id } => {
                    return Some((session_id.to_string(), data))
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_output_is_tagged_with_session() {
        let ((sink, _stream), mut peer) = memory_pair();
        let writer = ChannelWriter::new(sink);
        let termination = Termination::new();

        let session = PtySession::new(SessionId::new("s1"), Arc::new(ShellCommand::new("/bin/sh")));
        let generation = session.reset().unwrap();
        spawn_output_reader(
            SessionId::new("s1"),
            generation,
            writer.clone(),
            termination.clone(),
        )
        .unwrap();

        session.write(b"echo reader-marker\n").unwrap();

        let mut seen = String::new();
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some((id, data)) = next_output(&mut peer).await {
                assert_eq!(id, "s1");
                seen.push_str(&data);
                if seen.contains("reader-marker") {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(found, "no marker in output: {:?}", seen);

        session.close();
        assert!(!termination.is_terminated());
    }

    #[tokio::test]
    async fn test_retired_generation_stops_silently() {
        let ((sink, _stream), _peer) = memory_pair();
        let writer = ChannelWriter::new(sink);
        let termination = Termination::new();

        let session = PtySession::new(SessionId::new("s1"), Arc::new(ShellCommand::new("/bin/sh")));
        let first = session.reset().unwrap();
        let handle = spawn_output_reader(
            SessionId::new("s1"),
            first,
            writer.clone(),
            termination.clone(),
        )
        .unwrap();

        session.reset().unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("old reader should exit")
            .unwrap();
        assert!(!termination.is_terminated());
        session.close();
    }

    /// Read output frames until `marker` shows up, returning everything seen
    async fn collect_until(peer: &mut crate::transport::MemoryPeer, marker: &str) -> String {
        let mut seen = String::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while !seen.contains(marker) {
                let (id, data) = next_output(peer).await.expect("channel closed");
                assert_eq!(id, "s1");
                seen.push_str(&data);
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {:?} in output: {:?}", marker, seen));
        seen
    }

    #[tokio::test]
    async fn test_reset_leaves_only_new_generation_output() {
        let ((sink, _stream), mut peer) = memory_pair();
        let writer = ChannelWriter::new(sink);
        let termination = Termination::new();
        let session = PtySession::new(SessionId::new("s1"), Arc::new(ShellCommand::new("/bin/sh")));

        let first = session.reset().unwrap();
        let first_reader =
            spawn_output_reader(SessionId::new("s1"), first, writer.clone(), termination.clone())
                .unwrap();
        // Keeps printing until killed, so a leaking reader would show up below.
        session
            .write(b"while :; do echo first-$((10+1)); sleep 0.05; done\n")
            .unwrap();
        collect_until(&mut peer, "first-11").await;

        let second = session.reset().unwrap();
        tokio::time::timeout(Duration::from_secs(5), first_reader)
            .await
            .expect("retired reader should exit")
            .unwrap();

        // Frames sent before the retirement may still be queued; drain them.
        tokio::time::timeout(Duration::from_secs(5), async {
            while tokio::time::timeout(Duration::from_millis(300), next_output(&mut peer))
                .await
                .is_ok()
            {}
        })
        .await
        .expect("output kept arriving after reset");

        let second_reader =
            spawn_output_reader(SessionId::new("s1"), second, writer, termination.clone()).unwrap();
        session.write(b"echo second-$((20+2))\n").unwrap();
        let seen = collect_until(&mut peer, "second-22").await;

        assert!(!seen.contains("first-11"), "retired generation leaked: {:?}", seen);
        assert!(!second_reader.is_finished());
        assert!(!termination.is_terminated());
        session.close();
    }

    #[tokio::test]
    async fn test_second_reader_is_refused() {
        let ((sink, _stream), _peer) = memory_pair();
        let writer = ChannelWriter::new(sink);
        let termination = Termination::new();
        let session = PtySession::new(SessionId::new("s1"), Arc::new(ShellCommand::new("/bin/sh")));

        let generation = session.reset().unwrap();
        let first = spawn_output_reader(
            SessionId::new("s1"),
            Arc::clone(&generation),
            writer.clone(),
            termination.clone(),
        );
        let second = spawn_output_reader(SessionId::new("s1"), generation, writer, termination);
        assert!(first.is_some());
        assert!(second.is_none());
        session.close();
    }

    #[tokio::test]
    async fn test_shell_exit_terminates_channel() {
        let ((sink, _stream), _peer) = memory_pair();
        let writer = ChannelWriter::new(sink);
        let termination = Termination::new();

        let session = PtySession::new(SessionId::new("s1"), Arc::new(ShellCommand::new("/bin/sh")));
        let generation = session.reset().unwrap();
        spawn_output_reader(SessionId::new("s1"), generation, writer, termination.clone()).unwrap();

        session.write(b"exit\n").unwrap();
        let error = tokio::time::timeout(Duration::from_secs(10), termination.wait())
            .await
            .expect("shell exit should end the channel");
        assert!(matches!(error, ChannelError::Session(_)));
    }
}

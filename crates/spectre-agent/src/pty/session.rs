//! A named, resettable shell slot

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use spectre_core::SessionError;
use spectre_protocol::SessionId;

use super::{Generation, ShellCommand};

/// Observable lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Never reset
    Absent,
    /// A shell generation is live
    Active,
    /// Closed; only a new `reset` brings it back
    Stopped,
}

enum SessionState {
    Absent,
    Active(Arc<Generation>),
    Stopped,
}

/// One session's slot for its current generation.
///
/// The current generation is only reachable through this accessor under
/// the session lock. Retiring a generation happens after the lock is
/// released, so a `reset` never waits on anything the old reader holds.
pub struct PtySession {
    id: SessionId,
    shell: Arc<ShellCommand>,
    state: Mutex<SessionState>,
    generations: AtomicU64,
}

impl PtySession {
    pub fn new(id: SessionId, shell: Arc<ShellCommand>) -> Self {
        Self {
            id,
            shell,
            state: Mutex::new(SessionState::Absent),
            generations: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SessionStatus {
        match &*self.state() {
            SessionState::Absent => SessionStatus::Absent,
            SessionState::Active(_) => SessionStatus::Active,
            SessionState::Stopped => SessionStatus::Stopped,
        }
    }

    /// The live generation, if any
    pub fn current(&self) -> Option<Arc<Generation>> {
        match &*self.state() {
            SessionState::Active(generation) => Some(Arc::clone(generation)),
            _ => None,
        }
    }

    /// Start a fresh shell and make it current, retiring the previous one.
    ///
    /// Returns the new generation so the caller can attach its reader.
    pub fn reset(&self) -> Result<Arc<Generation>, SessionError> {
        let number = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let next = Arc::new(Generation::spawn(number, &self.shell)?);

        let previous = std::mem::replace(
            &mut *self.state(),
            SessionState::Active(Arc::clone(&next)),
        );

        if let SessionState::Active(old) = previous {
            tracing::debug!(
                "Session {} replacing generation {} with {}",
                self.id,
                old.number(),
                number
            );
            old.close();
        } else {
            tracing::info!("Session {} started (pid {:?})", self.id, next.pid());
        }
        Ok(next)
    }

    /// Send input to the live shell; fails instead of queueing when there
    /// is none
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let generation = self
            .current()
            .ok_or_else(|| SessionError::NoActiveSession(self.id.to_string()))?;
        generation.write(data)
    }

    /// Stop the session. Idempotent.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state(), SessionState::Stopped);
        if let SessionState::Active(generation) = previous {
            tracing::info!("Session {} closed", self.id);
            generation.close();
        }
    }
}

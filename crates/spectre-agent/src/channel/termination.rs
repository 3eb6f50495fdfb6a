//! First-error termination slot

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;

/// Settled exactly once by whichever loop fails first.
///
/// Every loop attached to a channel selects on [`Termination::cancelled`];
/// the task that owns the channel waits on [`Termination::wait`] and then
/// tears everything down. Errors reported after the first are dropped.
#[derive(Clone)]
pub struct Termination {
    inner: Arc<Inner>,
}

struct Inner {
    error: Mutex<Option<ChannelError>>,
    token: CancellationToken,
}

impl Termination {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A slot that also settles when `parent` is cancelled (agent shutdown)
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                error: Mutex::new(None),
                token,
            }),
        }
    }

    /// Report a failure. Returns true if this was the first.
    pub fn fail(&self, error: ChannelError) -> bool {
        let mut slot = self
            .inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.token.is_cancelled() {
            tracing::trace!("Discarding late channel error: {}", error);
            return false;
        }
        *slot = Some(error);
        self.inner.token.cancel();
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the slot is settled
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Token that fires with the slot, for tasks that only need the signal
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Wait for termination and take the error that caused it.
    ///
    /// Termination by the parent token yields [`ChannelError::Shutdown`].
    pub async fn wait(&self) -> ChannelError {
        self.cancelled().await;
        self.inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(ChannelError::Shutdown)
    }
}

impl Default for Termination {
    fn default() -> Self {
        Self::new()
    }
}

//! Client mode: dial a controller and keep redialing
//!
//! Each attempt builds a fresh transport, control channel and multiplexer.
//! The backoff delay grows after every cycle, whether the cycle failed to
//! connect or connected and later dropped, and is never put back to its
//! initial value.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use spectre_core::config::BackoffConfig;
use spectre_core::endpoint::build_dial_url;
use spectre_core::ConnectionError;

use crate::channel::ControlChannel;
use crate::connection::run_channel;
use crate::error::ChannelError;
use crate::state::AgentState;
use crate::transport;

/// Exponential backoff with jitter for reconnection attempts
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: initial.min(max),
            max,
            multiplier,
            jitter: if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) },
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        // Out-of-range products (negative, NaN, overflow) pin to the cap.
        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = next.min(self.max);

        if self.jitter == 0.0 {
            return delay;
        }
        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::try_from_secs_f64(jitter_amount).unwrap_or_default()
    }
}

/// URL without its query string, safe to log
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// Dial `host` until shutdown.
///
/// Only an address that cannot be turned into a URL is returned as an
/// error; every connection failure is logged and retried.
pub async fn run_client(state: Arc<AgentState>, host: &str) -> Result<(), ConnectionError> {
    let url = build_dial_url(host, &state.config.token)?;
    let target = redacted(&url);
    tracing::info!("Client mode: connecting to {}", target);

    let backoff = ExponentialBackoff::from_config(&state.config.backoff);
    let shutdown = state.shutdown.clone();

    drive(backoff, &shutdown, || {
        let state = Arc::clone(&state);
        let url = url.clone();
        let target = target.clone();
        async move {
            let result = connect_once(state, &url).await;
            match &result {
                Ok(reason) => tracing::warn!("Connection to {} ended: {}", target, reason),
                Err(e) => tracing::warn!("Connection to {} failed: {}", target, e),
            }
            result
        }
    })
    .await;

    tracing::info!("Client mode stopped");
    Ok(())
}

/// The retry loop: attempt, wait out the backoff, repeat until `shutdown`.
///
/// `attempt` resolves once its connection is over, with the reason it ended
/// (`Ok`) or the reason it never got going (`Err`). Both advance the backoff.
pub async fn drive<F, Fut>(
    mut backoff: ExponentialBackoff,
    shutdown: &CancellationToken,
    mut attempt: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ChannelError, ChannelError>>,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = attempt() => {}
        }

        let delay = backoff.next_delay();
        tracing::info!("Reconnecting in {:?}", delay);
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One full cycle: dial, handshake, run the channel to completion
async fn connect_once(state: Arc<AgentState>, url: &Url) -> Result<ChannelError, ChannelError> {
    let halves = transport::connect(url).await?;
    let mut channel = ControlChannel::new(halves, &state.shutdown);

    if let Err(e) = channel
        .dial_handshake(&state.hello(), state.config.handshake_timeout)
        .await
    {
        channel.close().await;
        return Err(e);
    }

    tracing::info!("Connected to controller");
    Ok(run_channel(channel, state).await)
}

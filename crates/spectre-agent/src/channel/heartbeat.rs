//! Periodic liveness pings

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use spectre_protocol::AgentMessage;

use super::{ChannelWriter, Termination};

/// Shortest period the ticker accepts; `AgentConfig::validate` rejects zero
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Send `heartbeat` every `period` until the channel terminates.
///
/// A failed write settles the termination slot, which is how a half-open
/// socket gets noticed.
pub fn spawn_heartbeat(
    writer: ChannelWriter,
    period: Duration,
    termination: Termination,
) -> JoinHandle<()> {
    if period.is_zero() {
        tracing::warn!("Heartbeat interval of zero raised to {:?}", MIN_PERIOD);
    }
    let period = period.max(MIN_PERIOD);

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = termination.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = writer.send(&AgentMessage::Heartbeat).await {
                        tracing::debug!("Heartbeat failed: {}", e);
                        termination.fail(e);
                        break;
                    }
                    tracing::trace!("Heartbeat sent");
                }
            }
        }
    })
}

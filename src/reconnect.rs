use crate::client::{SignalingClient, stop_requested};
use crate::media::MediaSignal;
use log::debug;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How long to wait before dialing the rendezvous server again.
///
/// Attempts are unbounded; only `disconnect` stops the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay after every failure.
    Fixed(Duration),
    /// `base` times the number of consecutive failures, capped at `max`.
    /// The count resets once a connection is established.
    Backoff { base: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt`, counting from 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Backoff { base, max } => base.saturating_mul(attempt.max(1)).min(max),
        }
    }
}

impl SignalingClient {
    /// Sleeps for `delay` while still serving media events, so a call that
    /// is already up survives a signaling outage.
    ///
    /// Returns false if shutdown was requested during the wait.
    pub(crate) async fn wait_for_reconnect(
        &self,
        delay: Duration,
        media_events: &mut mpsc::UnboundedReceiver<MediaSignal>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(shutdown) => {
                    debug!(target: "Client/Reconnect", "Shutdown requested while waiting to reconnect");
                    return false;
                }
                _ = &mut sleep => return true,
                Some(signal) = media_events.recv() => {
                    self.calls.handle_media_signal(signal).await;
                }
            }
        }
    }
}

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::MediaCache;

/// Periodic expiry sweep, independent of any request.
///
/// Stops when cancelled or dropped.
#[derive(Debug)]
pub struct SweepHandle {
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Start sweeping every `interval`. Returns `None` for a zero interval.
    pub fn spawn(cache: Arc<MediaCache>, interval: Duration) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }
        let token = CancellationToken::new();
        let stop = token.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; open already applied expiry.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.evict_expired().await;
                        cache.flush().await;
                        debug!(removed, "expiry sweep finished");
                    }
                }
            }
            info!("expiry sweep stopped");
        });
        Some(Self {
            token,
            join: Some(join),
        })
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the task to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

//! The dispatch loop.

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::Queue;

impl Queue {
    /// Drive dispatch passes until `shutdown` is cancelled.
    ///
    /// A pass runs whenever the queue is woken (a request registers, a stage
    /// is scheduled, the queue resumes) and otherwise once per interval, so
    /// lost wake-ups are still picked up by the next sweep.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            lock = %self.lock_key(),
            "Dispatch loop starting"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.ready.notified() => {}
                _ = ticker.tick() => {}
            }

            match self.signal(&shutdown).await {
                Ok(0) => {}
                Ok(handoffs) => debug!(handoffs, "Dispatch pass complete"),
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(error = %e, "Dispatch pass failed"),
            }
        }

        info!("Dispatch loop stopped");
    }
}

//! Idle session reclamation.

use std::sync::Arc;
use std::time::Duration;

use scenestream_common::SessionId;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::store::SessionStore;

/// Periodically terminates sessions nobody has touched for a while.
#[derive(Clone)]
pub struct Janitor {
    store: Arc<SessionStore>,
    interval: Duration,
    idle_threshold: Duration,
}

impl Janitor {
    pub fn new(store: Arc<SessionStore>, interval: Duration, idle_threshold: Duration) -> Self {
        Self {
            store,
            interval,
            idle_threshold,
        }
    }

    /// Run one sweep. Returns the sessions this sweep reclaimed.
    ///
    /// Each candidate is re-checked at termination time. A session touched
    /// while an earlier one was being torn down, or terminated concurrently
    /// by someone else, is skipped.
    pub async fn sweep(&self) -> Vec<(SessionId, Duration)> {
        let mut reclaimed = Vec::new();
        for (id, _) in self.store.idle_sessions(self.idle_threshold) {
            if let Some(idle) = self.store.terminate_if_idle(id, self.idle_threshold).await {
                tracing::info!(
                    session_id = %id,
                    idle_secs = idle.as_secs(),
                    "Reclaimed idle session"
                );
                reclaimed.push((id, idle));
            }
        }
        reclaimed
    }

    /// Sweep on a fixed period until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                idle_threshold_secs = self.idle_threshold.as_secs(),
                "Janitor started"
            );
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let reclaimed = self.sweep().await;
                        if !reclaimed.is_empty() {
                            tracing::debug!(count = reclaimed.len(), "Janitor sweep finished");
                        }
                    }
                }
            }
            tracing::info!("Janitor stopped");
        })
    }
}

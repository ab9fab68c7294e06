//! Seek handling.
//!
//! A seek close to the current start offset is served by the running encode
//! run. A far seek restarts every quality at the new offset as a new run in
//! the same session directory; earlier runs' segments stay on disk and the
//! session id does not change.

use std::sync::Arc;

use scenestream_common::{Error, Result, SessionId};

use crate::profile::Quality;
use crate::session::{SessionSnapshot, SessionState};
use crate::store::{validate_offset, SessionStore};

/// Result of a seek.
#[derive(Debug, Clone)]
pub struct SeekOutcome {
    pub snapshot: SessionSnapshot,
    /// Whether encoders were restarted.
    pub restarted: bool,
}

#[derive(Clone)]
pub struct SeekCoordinator {
    store: Arc<SessionStore>,
    near_threshold_secs: f64,
}

impl SeekCoordinator {
    pub fn new(store: Arc<SessionStore>) -> Self {
        let near_threshold_secs = store.settings().near_seek_threshold_secs;
        Self {
            store,
            near_threshold_secs,
        }
    }

    /// Whether a seek from `current` to `target` keeps the running encode.
    pub fn is_near(&self, current: f64, target: f64) -> bool {
        (target - current).abs() < self.near_threshold_secs
    }

    pub async fn handle_seek(&self, id: SessionId, offset_secs: f64) -> Result<SeekOutcome> {
        self.store.touch(id)?;
        let entry = self.store.entry(id)?;
        let mut session = entry.session.write().await;
        if session.state == SessionState::Terminated {
            return Err(Error::not_found("session", id));
        }
        validate_offset(offset_secs, session.source.duration_secs)?;

        let current = session.current_start_offset_secs;
        if self.is_near(current, offset_secs) {
            tracing::debug!(
                session_id = %id,
                from = current,
                to = offset_secs,
                "Near seek, keeping encoders"
            );
            let idle = self.store.idle_for(id).unwrap_or_default();
            return Ok(SeekOutcome {
                snapshot: session.snapshot(idle.as_secs_f64()),
                restarted: false,
            });
        }

        let qualities: Vec<Quality> = session.qualities.iter().map(|s| s.quality).collect();
        for quality in &qualities {
            self.store
                .restart_quality(&mut session, *quality, offset_secs)
                .await;
        }
        session.current_start_offset_secs = offset_secs;
        session.recompute_state();

        tracing::info!(
            session_id = %id,
            from = current,
            to = offset_secs,
            qualities = qualities.len(),
            state = ?session.state,
            "Far seek, encoders restarted"
        );
        Ok(SeekOutcome {
            snapshot: session.snapshot(0.0),
            restarted: true,
        })
    }
}

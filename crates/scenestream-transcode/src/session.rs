//! Session data model.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use scenestream_common::{SceneId, SessionId, UserId};
use serde::Serialize;
use tokio::time::Instant;

use crate::diagnostics::SharedDiagnostics;
use crate::profile::Quality;
use crate::supervisor::EncoderHandle;

/// A resolved source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMedia {
    pub path: PathBuf,
    /// Duration in seconds, when the library knows it.
    pub duration_secs: Option<f64>,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Active,
    Error,
    Terminated,
}

/// Lifecycle of one quality's current encode run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum QualityState {
    /// Launch requested, no confirmation yet.
    Starting,
    /// Process confirmed running.
    Running,
    /// Process exited successfully; the run is complete.
    Completed,
    /// Process could not be launched.
    Failed(String),
    /// Process exited with an error.
    Errored(Option<i32>),
}

impl QualityState {
    /// Whether an encoder process is (or may be) alive for this state.
    pub fn is_live(&self) -> bool {
        matches!(self, QualityState::Starting | QualityState::Running)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, QualityState::Failed(_) | QualityState::Errored(_))
    }
}

/// The live process behind a quality slot.
#[derive(Debug, Clone)]
pub struct EncodeProcess {
    pub handle: EncoderHandle,
    pub start_offset_secs: f64,
    pub started_at: DateTime<Utc>,
}

/// Per-quality bookkeeping within a session.
#[derive(Debug, Clone)]
pub struct QualitySlot {
    pub quality: Quality,
    /// Current encode run; bumped on every restart.
    pub run: u32,
    pub state: QualityState,
    pub process: Option<EncodeProcess>,
    /// Offset the current run started from.
    pub run_offset_secs: f64,
    /// Diagnostics of the most recent process, kept after it exits.
    pub last_diagnostics: Option<SharedDiagnostics>,
}

impl QualitySlot {
    pub fn new(quality: Quality, offset: f64) -> Self {
        Self {
            quality,
            run: 0,
            state: QualityState::Starting,
            process: None,
            run_offset_secs: offset,
            last_diagnostics: None,
        }
    }
}

/// One playback request's transcoding work.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub scene_id: SceneId,
    pub source: SourceMedia,
    pub user_id: UserId,
    pub current_start_offset_secs: f64,
    /// Requested qualities in request order.
    pub qualities: Vec<QualitySlot>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    /// `<work_dir>/<session_id>`, never shared with another session.
    pub dir: PathBuf,
}

impl Session {
    pub fn quality_dir(&self, quality: Quality) -> PathBuf {
        self.dir.join(quality.label())
    }

    pub fn slot(&self, quality: Quality) -> Option<&QualitySlot> {
        self.qualities.iter().find(|s| s.quality == quality)
    }

    pub fn slot_mut(&mut self, quality: Quality) -> Option<&mut QualitySlot> {
        self.qualities.iter_mut().find(|s| s.quality == quality)
    }

    /// Derive the session state from its quality slots.
    ///
    /// `terminated` is sticky. Otherwise the session is `error` when every
    /// quality has failed, `active` once any quality is confirmed running or
    /// finished, and `starting` before that.
    pub fn recompute_state(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        let states = self.qualities.iter().map(|s| &s.state);
        self.state = if self.qualities.is_empty() || states.clone().all(QualityState::is_failure)
        {
            SessionState::Error
        } else if states
            .clone()
            .any(|s| matches!(s, QualityState::Running | QualityState::Completed))
        {
            SessionState::Active
        } else {
            SessionState::Starting
        };
    }

    pub fn snapshot(&self, idle_secs: f64) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            scene_id: self.scene_id.clone(),
            user_id: self.user_id,
            state: self.state,
            start_offset: self.current_start_offset_secs,
            duration: self.source.duration_secs,
            created_at: self.created_at,
            idle_secs,
            qualities: self
                .qualities
                .iter()
                .map(|s| QualitySnapshot {
                    quality: s.quality,
                    run: s.run,
                    state: s.state.clone(),
                    pid: s.process.as_ref().and_then(|p| p.handle.pid),
                    run_offset: s.run_offset_secs,
                })
                .collect(),
        }
    }
}

/// Read-only view of a session for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub scene_id: SceneId,
    pub user_id: UserId,
    pub state: SessionState,
    pub start_offset: f64,
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub idle_secs: f64,
    pub qualities: Vec<QualitySnapshot>,
}

impl SessionSnapshot {
    /// Qualities that have not failed, in request order.
    pub fn available_qualities(&self) -> Vec<Quality> {
        self.qualities
            .iter()
            .filter(|q| !q.state.is_failure())
            .map(|q| q.quality)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualitySnapshot {
    pub quality: Quality,
    pub run: u32,
    pub state: QualityState,
    pub pid: Option<u32>,
    pub run_offset: f64,
}

/// Monotonic instant converted to milliseconds since a fixed epoch.
pub(crate) fn millis_since(epoch: Instant, now: Instant) -> u64 {
    u64::try_from(now.saturating_duration_since(epoch).as_millis()).unwrap_or(u64::MAX)
}

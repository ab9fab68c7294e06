//! In-process encoder supervisor for tests.
//!
//! [`FakeSupervisor`] never spawns anything. It records start and kill
//! calls, tracks which (session, quality) pairs have a live encoder, writes
//! placeholder segment files on request, and synthesizes exit events.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scenestream_common::{Error, Result, SessionId};

use crate::diagnostics::shared_diagnostics;
use crate::encoder::{segment_file_name, EncodeRequest};
use crate::profile::Quality;
use crate::supervisor::{EncoderEvent, EncoderHandle, EncoderSupervisor, EventSender};

struct LiveEncoder {
    handle_id: u64,
    request: EncodeRequest,
    events: EventSender,
}

#[derive(Default)]
struct FakeState {
    starts: Vec<EncodeRequest>,
    kills: Vec<u64>,
    live: HashMap<(SessionId, Quality), LiveEncoder>,
    violations: usize,
    fail_all: bool,
    failing: HashSet<Quality>,
    kill_delay: Duration,
}

/// Fake [`EncoderSupervisor`].
#[derive(Default)]
pub struct FakeSupervisor {
    next_id: AtomicU64,
    state: Mutex<FakeState>,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A supervisor whose every launch fails.
    pub fn failing() -> Self {
        let sup = Self::new();
        sup.fail_all(true);
        sup
    }

    pub fn fail_all(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    /// Make launches of `quality` fail.
    pub fn fail_quality(&self, quality: Quality) {
        self.state.lock().failing.insert(quality);
    }

    /// Make every kill take `delay` before the encoder is gone, like a
    /// process sitting out its SIGTERM grace period.
    pub fn set_kill_delay(&self, delay: Duration) {
        self.state.lock().kill_delay = delay;
    }

    /// Every start request that reached the supervisor, including failed ones.
    pub fn starts(&self) -> Vec<EncodeRequest> {
        self.state.lock().starts.clone()
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().starts.len()
    }

    pub fn kill_count(&self) -> usize {
        self.state.lock().kills.len()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_live(&self, session: SessionId, quality: Quality) -> bool {
        self.state.lock().live.contains_key(&(session, quality))
    }

    /// How many starts found another encoder still alive for the same
    /// session and quality.
    pub fn invariant_violations(&self) -> usize {
        self.state.lock().violations
    }

    /// Write segments `0..count` of the live run for (session, quality).
    pub fn write_segments(
        &self,
        session: SessionId,
        quality: Quality,
        count: u32,
    ) -> std::io::Result<Vec<PathBuf>> {
        let (dir, run) = {
            let state = self.state.lock();
            let live = state.live.get(&(session, quality)).ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no live encoder")
            })?;
            (live.request.output_dir.clone(), live.request.run)
        };
        std::fs::create_dir_all(&dir)?;
        (0..count)
            .map(|index| {
                let path = dir.join(segment_file_name(run, index));
                std::fs::write(&path, format!("segment {run}-{index}"))?;
                Ok(path)
            })
            .collect()
    }

    /// Simulate the live encoder for (session, quality) exiting on its own.
    ///
    /// Returns `false` if no encoder was live.
    pub fn exit(&self, session: SessionId, quality: Quality, success: bool) -> bool {
        let Some(live) = self.state.lock().live.remove(&(session, quality)) else {
            return false;
        };
        let _ = live.events.send(EncoderEvent::Exited {
            session_id: session,
            quality,
            handle_id: live.handle_id,
            exit_code: Some(if success { 0 } else { 1 }),
            success,
        });
        true
    }
}

#[async_trait]
impl EncoderSupervisor for FakeSupervisor {
    async fn start(&self, request: EncodeRequest, events: EventSender) -> Result<EncoderHandle> {
        let mut state = self.state.lock();
        state.starts.push(request.clone());
        if state.fail_all || state.failing.contains(&request.quality) {
            return Err(Error::tool("ffmpeg", "simulated launch failure"));
        }

        std::fs::create_dir_all(&request.output_dir)?;
        let key = (request.session_id, request.quality);
        if state.live.contains_key(&key) {
            state.violations += 1;
        }
        let handle_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        state.live.insert(
            key,
            LiveEncoder {
                handle_id,
                request,
                events,
            },
        );

        Ok(EncoderHandle {
            id: handle_id,
            pid: None,
            diagnostics: shared_diagnostics(16),
        })
    }

    async fn kill(&self, handle: &EncoderHandle) {
        let delay = self.state.lock().kill_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        let key = state
            .live
            .iter()
            .find(|(_, live)| live.handle_id == handle.id)
            .map(|(key, _)| *key);
        let Some(key) = key else {
            return;
        };
        state.kills.push(handle.id);
        if let Some(live) = state.live.remove(&key) {
            let _ = live.events.send(EncoderEvent::Exited {
                session_id: key.0,
                quality: key.1,
                handle_id: handle.id,
                exit_code: None,
                success: false,
            });
        }
    }
}

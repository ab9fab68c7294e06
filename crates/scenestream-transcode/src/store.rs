//! In-memory session registry.
//!
//! Sessions live in a [`DashMap`] keyed by id. Each entry carries its own
//! async `RwLock`, so state transitions (create, seek, encoder exit,
//! terminate) are serialized per session while manifest and segment lookups
//! share read access. Last access is an atomic millisecond tick updated with
//! `fetch_max`, which keeps `touch` lock-free and monotonic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use scenestream_common::{Error, Result, SceneId, SessionId, UserId};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::encoder::EncodeRequest;
use crate::profile::{dedup_qualities, Quality};
use crate::session::{
    millis_since, EncodeProcess, QualitySlot, QualityState, Session, SessionSnapshot,
    SessionState, SourceMedia,
};
use crate::settings::TranscodeSettings;
use crate::supervisor::{EncoderEvent, EncoderSupervisor, EventReceiver, EventSender};

/// Parameters for [`SessionStore::create_session`].
#[derive(Debug, Clone)]
pub struct NewSession {
    pub scene_id: SceneId,
    pub source: SourceMedia,
    pub user_id: UserId,
    pub start_offset_secs: f64,
    /// Requested qualities; empty selects the configured defaults.
    pub qualities: Vec<Quality>,
}

pub(crate) struct SessionEntry {
    pub(crate) session: RwLock<Session>,
    last_access_ms: AtomicU64,
}

impl SessionEntry {
    fn touch(&self, now_ms: u64) {
        self.last_access_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Acquire)
    }
}

/// Registry of active sessions and owner of their encoder processes.
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
    supervisor: Arc<dyn EncoderSupervisor>,
    settings: Arc<TranscodeSettings>,
    epoch: Instant,
    events_tx: EventSender,
    events_rx: Mutex<Option<EventReceiver>>,
}

impl SessionStore {
    pub fn new(supervisor: Arc<dyn EncoderSupervisor>, settings: Arc<TranscodeSettings>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            sessions: DashMap::new(),
            supervisor,
            settings,
            epoch: Instant::now(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn settings(&self) -> &TranscodeSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Create a session and launch one encoder per requested quality.
    ///
    /// A quality that fails to launch is recorded as failed; the session is
    /// created regardless and ends up in `error` state only if every quality
    /// failed.
    pub async fn create_session(&self, new: NewSession) -> Result<SessionSnapshot> {
        let requested = if new.qualities.is_empty() {
            self.settings.default_qualities.clone()
        } else {
            new.qualities
        };
        let qualities = dedup_qualities(&requested);
        if qualities.is_empty() {
            return Err(Error::Validation("at least one quality is required".into()));
        }
        validate_offset(new.start_offset_secs, new.source.duration_secs)?;

        let id = SessionId::new();
        let dir = self.settings.work_dir.join(id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let offset = new.start_offset_secs;
        let session = Session {
            id,
            scene_id: new.scene_id,
            source: new.source,
            user_id: new.user_id,
            current_start_offset_secs: offset,
            qualities: qualities
                .iter()
                .map(|q| QualitySlot::new(*q, offset))
                .collect(),
            state: SessionState::Starting,
            created_at: Utc::now(),
            dir,
        };
        let entry = Arc::new(SessionEntry {
            session: RwLock::new(session),
            last_access_ms: AtomicU64::new(self.now_ms()),
        });

        // Exit events for the new encoders block on this guard until every
        // handle is recorded.
        let mut session = entry.session.write().await;
        self.sessions.insert(id, entry.clone());

        for quality in qualities {
            self.start_encoder(&mut session, quality).await;
        }
        session.recompute_state();

        tracing::info!(
            session_id = %id,
            scene_id = %session.scene_id,
            user_id = %session.user_id,
            offset,
            state = ?session.state,
            "Session created"
        );
        Ok(session.snapshot(0.0))
    }

    /// Snapshot of a session.
    pub async fn get(&self, id: SessionId) -> Result<SessionSnapshot> {
        let entry = self.entry(id)?;
        let idle = self.idle_of(&entry);
        let session = entry.session.read().await;
        if session.state == SessionState::Terminated {
            return Err(Error::not_found("session", id));
        }
        Ok(session.snapshot(idle.as_secs_f64()))
    }

    /// Record activity on a session.
    pub fn touch(&self, id: SessionId) -> Result<()> {
        let entry = self.entry(id)?;
        entry.touch(self.now_ms());
        Ok(())
    }

    /// Kill every encoder, delete the output directory and forget the session.
    ///
    /// Returns `false` if the session was unknown or already terminated.
    /// Concurrent callers are safe: only the caller that removes the entry
    /// performs the cleanup.
    pub async fn terminate(&self, id: SessionId) -> bool {
        let Some((_, entry)) = self.sessions.remove(&id) else {
            tracing::debug!(session_id = %id, "Terminate on unknown session ignored");
            return false;
        };
        self.tear_down(id, entry).await;
        true
    }

    /// Terminate the session only if it is still idle for longer than
    /// `threshold`, returning its idle time.
    ///
    /// The idle check and the removal happen under the map's shard lock, so
    /// a session touched after an earlier idle query is left alone.
    pub async fn terminate_if_idle(&self, id: SessionId, threshold: Duration) -> Option<Duration> {
        let now = self.now_ms();
        let (_, entry) = self.sessions.remove_if(&id, |_, entry| {
            Duration::from_millis(now.saturating_sub(entry.last_access_ms())) > threshold
        })?;
        let idle = Duration::from_millis(now.saturating_sub(entry.last_access_ms()));
        self.tear_down(id, entry).await;
        Some(idle)
    }

    async fn tear_down(&self, id: SessionId, entry: Arc<SessionEntry>) {
        let mut session = entry.session.write().await;
        session.state = SessionState::Terminated;
        for slot in session.qualities.iter_mut() {
            self.stop_encoder(slot).await;
        }

        match tokio::fs::remove_dir_all(&session.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(
                session_id = %id,
                "Failed to remove session directory {}: {e}",
                session.dir.display()
            ),
        }

        tracing::info!(session_id = %id, "Session terminated");
    }

    /// Time since the session was last touched.
    pub fn idle_for(&self, id: SessionId) -> Option<Duration> {
        let entry = self.entry(id).ok()?;
        Some(self.idle_of(&entry))
    }

    /// Sessions idle for longer than `threshold`, with their idle time.
    pub fn idle_sessions(&self, threshold: Duration) -> Vec<(SessionId, Duration)> {
        let now = self.now_ms();
        self.sessions
            .iter()
            .filter_map(|e| {
                let idle = Duration::from_millis(now.saturating_sub(e.value().last_access_ms()));
                (idle > threshold).then_some((*e.key(), idle))
            })
            .collect()
    }

    /// Snapshots of every live session, oldest first.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let entries: Vec<Arc<SessionEntry>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let idle = self.idle_of(&entry);
            let session = entry.session.read().await;
            if session.state != SessionState::Terminated {
                out.push(session.snapshot(idle.as_secs_f64()));
            }
        }
        out.sort_by_key(|s| s.created_at);
        out
    }

    /// Apply an encoder event. Events from superseded processes are ignored.
    pub async fn handle_event(&self, event: EncoderEvent) {
        let EncoderEvent::Exited {
            session_id,
            quality,
            handle_id,
            exit_code,
            success,
        } = event;

        let Ok(entry) = self.entry(session_id) else {
            tracing::debug!(%session_id, %quality, "Exit event for unknown session");
            return;
        };
        let mut session = entry.session.write().await;
        let Some(slot) = session.slot_mut(quality) else {
            return;
        };
        let current = slot.process.as_ref().map(|p| p.handle.id);
        if current != Some(handle_id) {
            tracing::debug!(%session_id, %quality, handle_id, "Ignoring stale exit event");
            return;
        }

        if let Some(process) = slot.process.take() {
            slot.last_diagnostics = Some(process.handle.diagnostics);
        }
        slot.state = if success {
            QualityState::Completed
        } else {
            QualityState::Errored(exit_code)
        };
        let run = slot.run;
        session.recompute_state();

        if success {
            tracing::info!(%session_id, %quality, run, "Quality run completed");
        } else {
            tracing::warn!(
                %session_id,
                %quality,
                run,
                exit_code = exit_code.unwrap_or(-1),
                state = ?session.state,
                "Quality encoder errored"
            );
        }
    }

    /// Apply every queued event. Returns how many were processed.
    ///
    /// Only useful while no event loop has taken the receiver.
    pub async fn drain_events(&self) -> usize {
        let events: Vec<EncoderEvent> = {
            let mut guard = self.events_rx.lock();
            let Some(rx) = guard.as_mut() else {
                return 0;
            };
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        let count = events.len();
        for event in events {
            self.handle_event(event).await;
        }
        count
    }

    /// Run the event loop until `cancel` fires.
    pub fn spawn_event_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let rx = self.events_rx.lock().take();
        tokio::spawn(async move {
            let Some(mut rx) = rx else {
                tracing::warn!("Session event loop already running");
                return;
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => store.handle_event(event).await,
                        None => break,
                    },
                }
            }
            tracing::debug!("Session event loop stopped");
        })
    }

    /// Terminate every session. Called on server shutdown.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        let mut count = 0;
        for id in ids {
            if self.terminate(id).await {
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(count, "Terminated sessions on shutdown");
        }
        count
    }

    pub(crate) fn entry(&self, id: SessionId) -> Result<Arc<SessionEntry>> {
        self.sessions
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::not_found("session", id))
    }

    /// Launch the encoder for `quality` at the slot's current run and offset.
    ///
    /// The caller holds the session write lock and has stopped any previous
    /// process for the slot.
    pub(crate) async fn start_encoder(&self, session: &mut Session, quality: Quality) {
        let session_id = session.id;
        let output_dir = session.quality_dir(quality);
        let source_path = session.source.path.clone();
        let Some(slot) = session.slot_mut(quality) else {
            return;
        };

        let request = EncodeRequest {
            session_id,
            quality,
            run: slot.run,
            source_path,
            start_offset_secs: slot.run_offset_secs,
            output_dir,
        };
        slot.state = QualityState::Starting;
        match self.supervisor.start(request, self.events_tx.clone()).await {
            Ok(handle) => {
                slot.process = Some(EncodeProcess {
                    handle,
                    start_offset_secs: slot.run_offset_secs,
                    started_at: Utc::now(),
                });
                slot.state = QualityState::Running;
            }
            Err(e) => {
                tracing::warn!(%session_id, %quality, run = slot.run, "Encoder launch failed: {e}");
                slot.process = None;
                slot.state = QualityState::Failed(e.to_string());
            }
        }
    }

    /// Stop the slot's encoder, if any, and wait for it to exit.
    pub(crate) async fn stop_encoder(&self, slot: &mut QualitySlot) {
        if let Some(process) = slot.process.take() {
            self.supervisor.kill(&process.handle).await;
            slot.last_diagnostics = Some(process.handle.diagnostics);
        }
    }

    /// Restart `quality` from `offset` as a new run.
    pub(crate) async fn restart_quality(&self, session: &mut Session, quality: Quality, offset: f64) {
        let Some(slot) = session.slot_mut(quality) else {
            return;
        };
        self.stop_encoder(slot).await;
        slot.run += 1;
        slot.run_offset_secs = offset;
        self.start_encoder(session, quality).await;
    }

    fn now_ms(&self) -> u64 {
        millis_since(self.epoch, Instant::now())
    }

    fn idle_of(&self, entry: &SessionEntry) -> Duration {
        Duration::from_millis(self.now_ms().saturating_sub(entry.last_access_ms()))
    }
}

/// Check a start or seek offset against the source duration.
pub(crate) fn validate_offset(offset: f64, duration: Option<f64>) -> Result<()> {
    if !offset.is_finite() || offset < 0.0 {
        return Err(Error::Validation(format!(
            "offset must be a non-negative number, got {offset}"
        )));
    }
    if let Some(duration) = duration {
        if duration > 0.0 && offset >= duration {
            return Err(Error::Validation(format!(
                "offset {offset} is beyond the source duration {duration}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSupervisor;
    use assert_matches::assert_matches;

    struct Fixture {
        _tmp: tempfile::TempDir,
        fake: Arc<FakeSupervisor>,
        store: SessionStore,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let settings = TranscodeSettings {
            work_dir: tmp.path().to_path_buf(),
            ..TranscodeSettings::default()
        };
        let fake = Arc::new(FakeSupervisor::new());
        let store = SessionStore::new(fake.clone(), Arc::new(settings));
        Fixture {
            _tmp: tmp,
            fake,
            store,
        }
    }

    fn new_session(qualities: &[Quality], offset: f64) -> NewSession {
        NewSession {
            scene_id: SceneId::from("42"),
            source: SourceMedia {
                path: "/media/scene.mp4".into(),
                duration_secs: Some(600.0),
            },
            user_id: UserId::anonymous(),
            start_offset_secs: offset,
            qualities: qualities.to_vec(),
        }
    }

    #[tokio::test]
    async fn create_starts_one_encoder_per_quality() {
        let f = fixture();
        let snap = f
            .store
            .create_session(new_session(&[Quality::P720, Quality::P480], 12.0))
            .await
            .unwrap();

        assert_eq!(snap.state, SessionState::Active);
        assert_eq!(f.fake.start_count(), 2);
        assert!(f.fake.starts().iter().all(|r| r.start_offset_secs == 12.0));
        assert!(f.store.settings().work_dir.join(snap.session_id.to_string()).is_dir());
    }

    #[tokio::test]
    async fn empty_quality_list_uses_defaults() {
        let f = fixture();
        let snap = f.store.create_session(new_session(&[], 0.0)).await.unwrap();
        let qualities: Vec<Quality> = snap.qualities.iter().map(|q| q.quality).collect();
        assert_eq!(qualities, vec![Quality::P720, Quality::P480]);
    }

    #[tokio::test]
    async fn rejects_bad_offsets() {
        let f = fixture();
        for offset in [-1.0, f64::NAN, 600.0, 900.0] {
            let err = f
                .store
                .create_session(new_session(&[Quality::P480], offset))
                .await
                .unwrap_err();
            assert_matches!(err, Error::Validation(_));
        }
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn partial_launch_failure_keeps_session() {
        let f = fixture();
        f.fake.fail_quality(Quality::P720);
        let snap = f
            .store
            .create_session(new_session(&[Quality::P720, Quality::P480], 0.0))
            .await
            .unwrap();

        assert_eq!(snap.state, SessionState::Active);
        assert_matches!(snap.qualities[0].state, QualityState::Failed(_));
        assert_eq!(snap.qualities[1].state, QualityState::Running);
    }

    #[tokio::test]
    async fn all_launches_failing_is_error_state() {
        let f = fixture();
        f.fake.fail_all(true);
        let snap = f
            .store
            .create_session(new_session(&[Quality::P720, Quality::P480], 0.0))
            .await
            .unwrap();
        assert_eq!(snap.state, SessionState::Error);
        assert_eq!(f.fake.live_count(), 0);
    }

    #[tokio::test]
    async fn exit_events_update_quality_state() {
        let f = fixture();
        let snap = f
            .store
            .create_session(new_session(&[Quality::P720, Quality::P480], 0.0))
            .await
            .unwrap();
        let id = snap.session_id;

        assert!(f.fake.exit(id, Quality::P480, true));
        assert!(f.fake.exit(id, Quality::P720, false));
        assert_eq!(f.store.drain_events().await, 2);

        let snap = f.store.get(id).await.unwrap();
        assert_eq!(snap.qualities[0].state, QualityState::Errored(Some(1)));
        assert_eq!(snap.qualities[1].state, QualityState::Completed);
        assert_eq!(snap.state, SessionState::Active);
    }

    #[tokio::test]
    async fn every_quality_erroring_moves_session_to_error() {
        let f = fixture();
        let id = f
            .store
            .create_session(new_session(&[Quality::P480], 0.0))
            .await
            .unwrap()
            .session_id;

        f.fake.exit(id, Quality::P480, false);
        f.store.drain_events().await;
        assert_eq!(f.store.get(id).await.unwrap().state, SessionState::Error);
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let f = fixture();
        let snap = f
            .store
            .create_session(new_session(&[Quality::P720, Quality::P480], 0.0))
            .await
            .unwrap();
        let id = snap.session_id;
        let dir = f.store.settings().work_dir.join(id.to_string());

        let (a, b) = tokio::join!(f.store.terminate(id), f.store.terminate(id));
        assert!(a ^ b, "exactly one terminate does the work");
        assert!(!f.store.terminate(id).await);

        assert!(!dir.exists());
        assert_eq!(f.fake.kill_count(), 2);
        assert_eq!(f.fake.live_count(), 0);
        assert_matches!(f.store.get(id).await, Err(Error::NotFound { .. }));
        assert_matches!(f.store.touch(id), Err(Error::NotFound { .. }));

        // Kill notifications for the removed session are ignored.
        f.store.drain_events().await;
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn terminate_unknown_session_is_a_no_op() {
        let f = fixture();
        assert!(!f.store.terminate(SessionId::new()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_idle_time() {
        let f = fixture();
        let id = f
            .store
            .create_session(new_session(&[Quality::P480], 0.0))
            .await
            .unwrap()
            .session_id;

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(f.store.idle_for(id), Some(Duration::from_secs(90)));
        assert_eq!(f.store.idle_sessions(Duration::from_secs(60)).len(), 1);

        f.store.touch(id).unwrap();
        assert_eq!(f.store.idle_for(id), Some(Duration::ZERO));
        assert!(f.store.idle_sessions(Duration::from_secs(60)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_if_idle_spares_a_touched_session() {
        let f = fixture();
        let id = f
            .store
            .create_session(new_session(&[Quality::P480], 0.0))
            .await
            .unwrap()
            .session_id;
        let threshold = Duration::from_secs(60);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(f.store.idle_sessions(threshold).len(), 1);
        f.store.touch(id).unwrap();

        assert_eq!(f.store.terminate_if_idle(id, threshold).await, None);
        assert!(f.store.get(id).await.is_ok());
        assert!(f.fake.is_live(id, Quality::P480));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            f.store.terminate_if_idle(id, threshold).await,
            Some(Duration::from_secs(61))
        );
        assert!(f.store.get(id).await.is_err());
        assert!(!f.fake.is_live(id, Quality::P480));
        assert_eq!(f.store.terminate_if_idle(id, threshold).await, None);
    }

    #[tokio::test]
    async fn stale_exit_after_restart_is_ignored() {
        let f = fixture();
        let id = f
            .store
            .create_session(new_session(&[Quality::P480], 0.0))
            .await
            .unwrap()
            .session_id;

        {
            let entry = f.store.entry(id).unwrap();
            let mut session = entry.session.write().await;
            f.store.restart_quality(&mut session, Quality::P480, 300.0).await;
        }
        // The kill during restart queued an exit for the old handle.
        f.store.drain_events().await;

        let snap = f.store.get(id).await.unwrap();
        assert_eq!(snap.qualities[0].state, QualityState::Running);
        assert_eq!(snap.qualities[0].run, 1);
        assert_eq!(f.fake.invariant_violations(), 0);
    }

    #[tokio::test]
    async fn event_loop_applies_events_until_cancelled() {
        let f = fixture();
        let store = Arc::new(f.store);
        let cancel = CancellationToken::new();
        let task = store.spawn_event_loop(cancel.clone());

        let id = store
            .create_session(new_session(&[Quality::P480], 0.0))
            .await
            .unwrap()
            .session_id;
        f.fake.exit(id, Quality::P480, true);

        for _ in 0..50 {
            if store.get(id).await.unwrap().qualities[0].state == QualityState::Completed {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            store.get(id).await.unwrap().qualities[0].state,
            QualityState::Completed
        );

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(store.drain_events().await, 0);
    }

    #[tokio::test]
    async fn shutdown_terminates_everything() {
        let f = fixture();
        for _ in 0..3 {
            f.store
                .create_session(new_session(&[Quality::P480], 0.0))
                .await
                .unwrap();
        }
        assert_eq!(f.store.list().await.len(), 3);
        assert_eq!(f.store.shutdown().await, 3);
        assert!(f.store.is_empty());
        assert_eq!(f.fake.live_count(), 0);
    }

    /// The store driven by a real [`FfmpegSupervisor`] over a shell script.
    #[cfg(unix)]
    mod with_ffmpeg {
        use super::*;
        use crate::supervisor::FfmpegSupervisor;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn store(tmp: &Path, ffmpeg: PathBuf) -> SessionStore {
            let settings = Arc::new(TranscodeSettings {
                work_dir: tmp.join("work"),
                kill_grace_period: Duration::from_millis(500),
                ..TranscodeSettings::default()
            });
            let supervisor = Arc::new(FfmpegSupervisor::new(ffmpeg, settings.clone()));
            SessionStore::new(supervisor, settings)
        }

        fn session_for(source: PathBuf) -> NewSession {
            NewSession {
                source: SourceMedia {
                    path: source,
                    duration_secs: Some(600.0),
                },
                ..new_session(&[Quality::P720, Quality::P480], 0.0)
            }
        }

        #[tokio::test]
        async fn unreadable_source_puts_the_session_in_error() {
            let tmp = tempfile::tempdir().unwrap();
            let store = store(tmp.path(), script(tmp.path(), "exec sleep 30"));

            let snap = store
                .create_session(session_for(tmp.path().join("missing.mp4")))
                .await
                .unwrap();

            assert_eq!(snap.state, SessionState::Error);
            for slot in &snap.qualities {
                assert_matches!(&slot.state, QualityState::Failed(reason) if reason.contains("missing.mp4"));
            }
            assert_eq!(store.shutdown().await, 1);
        }

        #[tokio::test]
        async fn encoder_dying_mid_run_errors_its_quality() {
            let tmp = tempfile::tempdir().unwrap();
            let source = tmp.path().join("scene.mp4");
            std::fs::write(&source, b"").unwrap();
            let store = store(
                tmp.path(),
                script(
                    tmp.path(),
                    "sleep 0.2\necho '[error] Conversion failed!' >&2\nexit 1",
                ),
            );

            let snap = store.create_session(session_for(source)).await.unwrap();
            let id = snap.session_id;
            assert_eq!(snap.state, SessionState::Active);
            assert!(snap
                .qualities
                .iter()
                .all(|slot| slot.state == QualityState::Running));

            let mut snap = store.get(id).await.unwrap();
            for _ in 0..100 {
                store.drain_events().await;
                snap = store.get(id).await.unwrap();
                if snap.state == SessionState::Error {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            assert_eq!(snap.state, SessionState::Error);
            for slot in &snap.qualities {
                assert_eq!(slot.state, QualityState::Errored(Some(1)));
            }
            // The id stays valid until someone terminates it.
            assert!(store.terminate(id).await);
        }
    }
}

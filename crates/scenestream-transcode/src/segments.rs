//! Segment inventory and lookup.
//!
//! The encoder writes `r<run>-<index>.ts` files into the quality directory,
//! renaming each into place only once it is complete. A lookup for a
//! segment the current run has not reached yet waits a bounded time and then
//! reports a retryable condition; a segment that can never appear is a
//! terminal not-found.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scenestream_common::{Error, Result, SessionId};
use tokio::time::Instant;

use crate::encoder::SegmentRef;
use crate::profile::Quality;
use crate::session::{QualityState, SessionState};
use crate::store::SessionStore;

/// Sorted indices of run `run` present in `dir`. A missing directory is empty.
pub async fn present_indices(dir: &Path, run: u32) -> Result<Vec<u32>> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut indices = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name();
        if let Some(seg) = name.to_str().and_then(SegmentRef::parse) {
            if seg.run == run {
                indices.push(seg.index);
            }
        }
    }
    indices.sort_unstable();
    Ok(indices)
}

/// Length of the gap-free run of indices starting at zero.
pub fn contiguous_prefix(sorted: &[u32]) -> u32 {
    let mut next = 0u32;
    for &index in sorted {
        if index != next {
            break;
        }
        next += 1;
    }
    next
}

/// Number of segments an encode starting at `offset` will produce, when the
/// source duration is known.
pub fn expected_segment_count(
    duration_secs: Option<f64>,
    offset_secs: f64,
    segment_duration_secs: u32,
) -> Option<u32> {
    let duration = duration_secs.filter(|d| d.is_finite() && *d > 0.0)?;
    if segment_duration_secs == 0 {
        return None;
    }
    let remaining = (duration - offset_secs).max(0.0);
    Some((remaining / f64::from(segment_duration_secs)).ceil() as u32)
}

/// What a lookup found under the session read lock.
enum Probe {
    Ready(PathBuf),
    Gone,
    Pending,
}

/// Resolves segment requests to files on disk.
#[derive(Clone)]
pub struct SegmentServer {
    store: Arc<SessionStore>,
    timeout: Duration,
    poll_interval: Duration,
}

impl SegmentServer {
    pub fn new(store: Arc<SessionStore>) -> Self {
        let timeout = store.settings().segment_wait_timeout;
        let poll_interval = store.settings().segment_poll_interval;
        Self {
            store,
            timeout,
            poll_interval,
        }
    }

    /// Resolve a segment, waiting up to the configured bound for the current
    /// run to produce it.
    ///
    /// Returns `NotYetAvailable` when the wait runs out and `NotFound` for a
    /// segment that will never exist.
    pub async fn get_segment(
        &self,
        id: SessionId,
        quality: Quality,
        segment: SegmentRef,
    ) -> Result<PathBuf> {
        self.store.touch(id)?;
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.probe(id, quality, segment).await? {
                Probe::Ready(path) => return Ok(path),
                Probe::Gone => {
                    return Err(Error::not_found(
                        "segment",
                        format!("{id}/{quality}/{segment}"),
                    ))
                }
                Probe::Pending if Instant::now() >= deadline => {
                    tracing::debug!(session_id = %id, %quality, %segment, "Segment not ready");
                    return Err(Error::not_yet_available(
                        format!("segment {segment}"),
                        self.store.settings().retry_after_ms(),
                    ));
                }
                Probe::Pending => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(self.poll_interval.min(remaining)).await;
                }
            }
        }
    }

    async fn probe(&self, id: SessionId, quality: Quality, segment: SegmentRef) -> Result<Probe> {
        let entry = self.store.entry(id)?;
        let session = entry.session.read().await;
        if session.state == SessionState::Terminated {
            return Err(Error::not_found("session", id));
        }
        let slot = session
            .slot(quality)
            .ok_or_else(|| Error::not_found("quality", quality))?;
        let path = session.quality_dir(quality).join(segment.file_name());

        if segment.run > slot.run {
            return Ok(Probe::Gone);
        }
        if is_file(&path).await {
            return Ok(Probe::Ready(path));
        }
        // Earlier runs are finished; whatever they did not write never will be.
        if segment.run < slot.run {
            return Ok(Probe::Gone);
        }

        let expected = expected_segment_count(
            session.source.duration_secs,
            slot.run_offset_secs,
            self.store.settings().segment_duration_secs,
        );
        if expected.is_some_and(|n| segment.index >= n) {
            return Ok(Probe::Gone);
        }

        Ok(match slot.state {
            QualityState::Starting | QualityState::Running => Probe::Pending,
            QualityState::Completed | QualityState::Failed(_) | QualityState::Errored(_) => {
                Probe::Gone
            }
        })
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SourceMedia;
    use crate::settings::TranscodeSettings;
    use crate::store::NewSession;
    use crate::testing::FakeSupervisor;
    use assert_matches::assert_matches;
    use scenestream_common::{SceneId, UserId};

    #[test]
    fn contiguous_prefix_stops_at_gap() {
        assert_eq!(contiguous_prefix(&[]), 0);
        assert_eq!(contiguous_prefix(&[0, 1, 2]), 3);
        assert_eq!(contiguous_prefix(&[0, 1, 3, 4]), 2);
        assert_eq!(contiguous_prefix(&[1, 2]), 0);
    }

    #[test]
    fn expected_count_rounds_up() {
        assert_eq!(expected_segment_count(Some(20.0), 0.0, 4), Some(5));
        assert_eq!(expected_segment_count(Some(21.0), 0.0, 4), Some(6));
        assert_eq!(expected_segment_count(Some(600.0), 400.0, 4), Some(50));
        assert_eq!(expected_segment_count(None, 0.0, 4), None);
        assert_eq!(expected_segment_count(Some(10.0), 20.0, 4), Some(0));
    }

    #[tokio::test]
    async fn present_indices_filters_by_run() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["r0-0.ts", "r0-2.ts", "r0-1.ts", "r1-0.ts", "r0-3.ts.tmp", "r0.m3u8"] {
            std::fs::write(tmp.path().join(name), b"").unwrap();
        }
        assert_eq!(present_indices(tmp.path(), 0).await.unwrap(), vec![0, 1, 2]);
        assert_eq!(present_indices(tmp.path(), 1).await.unwrap(), vec![0]);
        assert!(present_indices(&tmp.path().join("missing"), 0)
            .await
            .unwrap()
            .is_empty());
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        fake: Arc<FakeSupervisor>,
        store: Arc<SessionStore>,
        server: SegmentServer,
        id: SessionId,
    }

    async fn fixture(duration: Option<f64>) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let settings = TranscodeSettings {
            work_dir: tmp.path().to_path_buf(),
            segment_wait_timeout: Duration::from_millis(600),
            segment_poll_interval: Duration::from_millis(100),
            ..TranscodeSettings::default()
        };
        let fake = Arc::new(FakeSupervisor::new());
        let store = Arc::new(SessionStore::new(fake.clone(), Arc::new(settings)));
        let id = store
            .create_session(NewSession {
                scene_id: SceneId::from("7"),
                source: SourceMedia {
                    path: "/media/7.mp4".into(),
                    duration_secs: duration,
                },
                user_id: UserId::anonymous(),
                start_offset_secs: 0.0,
                qualities: vec![Quality::P480],
            })
            .await
            .unwrap()
            .session_id;
        let server = SegmentServer::new(store.clone());
        Fixture {
            _tmp: tmp,
            fake,
            store,
            server,
            id,
        }
    }

    #[tokio::test]
    async fn serves_existing_segment() {
        let f = fixture(Some(20.0)).await;
        f.fake.write_segments(f.id, Quality::P480, 2).unwrap();

        let path = f
            .server
            .get_segment(f.id, Quality::P480, SegmentRef::new(0, 1))
            .await
            .unwrap();
        assert!(path.ends_with("480p/r0-1.ts"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_segment_while_running_is_retryable() {
        let f = fixture(Some(20.0)).await;
        let err = f
            .server
            .get_segment(f.id, Quality::P480, SegmentRef::new(0, 3))
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotYetAvailable { retry_after_ms: 2000, .. });
    }

    #[tokio::test]
    async fn waits_for_segment_that_appears() {
        let f = fixture(Some(20.0)).await;
        let fake = f.fake.clone();
        let id = f.id;
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            fake.write_segments(id, Quality::P480, 1).unwrap();
        });

        let path = f
            .server
            .get_segment(f.id, Quality::P480, SegmentRef::new(0, 0))
            .await
            .unwrap();
        writer.await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn beyond_expected_count_is_terminal() {
        let f = fixture(Some(20.0)).await;
        let started = Instant::now();
        let err = f
            .server
            .get_segment(f.id, Quality::P480, SegmentRef::new(0, 5))
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound { .. });
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn missing_segment_after_success_is_terminal() {
        let f = fixture(None).await;
        f.fake.write_segments(f.id, Quality::P480, 5).unwrap();
        f.fake.exit(f.id, Quality::P480, true);
        f.store.drain_events().await;

        let err = f
            .server
            .get_segment(f.id, Quality::P480, SegmentRef::new(0, 9))
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound { .. });
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn future_run_and_unknown_quality_are_terminal() {
        let f = fixture(Some(20.0)).await;
        assert_matches!(
            f.server
                .get_segment(f.id, Quality::P480, SegmentRef::new(4, 0))
                .await,
            Err(Error::NotFound { .. })
        );
        assert_matches!(
            f.server
                .get_segment(f.id, Quality::P1080, SegmentRef::new(0, 0))
                .await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_touches_session() {
        let f = fixture(Some(20.0)).await;
        f.fake.write_segments(f.id, Quality::P480, 1).unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;

        f.server
            .get_segment(f.id, Quality::P480, SegmentRef::new(0, 0))
            .await
            .unwrap();
        assert_eq!(f.store.idle_for(f.id), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let f = fixture(Some(20.0)).await;
        assert_matches!(
            f.server
                .get_segment(SessionId::new(), Quality::P480, SegmentRef::new(0, 0))
                .await,
            Err(Error::NotFound { .. })
        );
    }
}

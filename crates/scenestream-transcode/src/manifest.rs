//! Master and per-quality manifest synthesis.
//!
//! Manifests are rebuilt on every request from the session's quality slots
//! and the segment files actually present on disk, so they never advertise a
//! segment the encoder has not finished writing.
//!
//! URIs are relative. A player authenticating with an `api_key` query
//! parameter cannot attach headers to the requests it derives from them, so
//! the key is carried on every variant and segment URI.

use std::sync::Arc;

use scenestream_common::{Error, Result, SessionId};

use crate::encoder::segment_file_name;
use crate::playlist::{MasterPlaylist, MediaPlaylist, StreamInfo, DEFAULT_CODECS};
use crate::profile::Quality;
use crate::segments::{contiguous_prefix, present_indices};
use crate::session::{QualitySlot, QualityState, Session, SessionState};
use crate::store::SessionStore;

/// Builds playlists for live sessions.
#[derive(Clone)]
pub struct ManifestBuilder {
    store: Arc<SessionStore>,
}

impl ManifestBuilder {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// The adaptive master playlist.
    ///
    /// Lists every quality whose own manifest can be served, highest
    /// bandwidth first. Qualities that failed to launch are omitted.
    pub async fn master(&self, id: SessionId, api_key: Option<&str>) -> Result<String> {
        self.store.touch(id)?;
        let entry = self.store.entry(id)?;
        let session = entry.session.read().await;
        if matches!(
            session.state,
            SessionState::Terminated | SessionState::Error
        ) {
            return Err(Error::not_found("session", id));
        }

        let mut variants: Vec<Quality> = Vec::with_capacity(session.qualities.len());
        for slot in &session.qualities {
            if self.segment_count(&session, slot).await?.is_some() {
                variants.push(slot.quality);
            }
        }
        variants.sort_by_key(|q| std::cmp::Reverse(q.profile().bandwidth_bps()));

        let master = variants.into_iter().fold(MasterPlaylist::new(), |m, q| {
            let p = q.profile();
            m.add_stream(StreamInfo {
                name: q.label().to_string(),
                uri: with_api_key(format!("{}/index.m3u8", q.label()), api_key),
                bandwidth: p.bandwidth_bps(),
                width: p.width,
                height: p.height,
                codecs: DEFAULT_CODECS.to_string(),
            })
        });
        Ok(master.render())
    }

    /// The media playlist for one quality's current run.
    ///
    /// Not found when the quality was not requested, failed to launch, or
    /// errored before writing any segment. `#EXT-X-ENDLIST` is present only
    /// after the run's encoder exited successfully.
    pub async fn quality(
        &self,
        id: SessionId,
        quality: Quality,
        api_key: Option<&str>,
    ) -> Result<String> {
        self.store.touch(id)?;
        let entry = self.store.entry(id)?;
        let session = entry.session.read().await;
        if session.state == SessionState::Terminated {
            return Err(Error::not_found("session", id));
        }
        let slot = session
            .slot(quality)
            .ok_or_else(|| Error::not_found("quality", quality))?;
        let Some(count) = self.segment_count(&session, slot).await? else {
            return Err(Error::not_found("quality", format!("{id}/{quality}")));
        };

        let segment_secs = self.store.settings().segment_duration_secs;
        let completed = slot.state == QualityState::Completed;
        let mut playlist = MediaPlaylist::event(segment_secs);
        for index in 0..count {
            let mut duration = f64::from(segment_secs);
            if completed && index + 1 == count {
                duration = last_segment_duration(&session, slot, count, segment_secs);
            }
            playlist.push(
                duration,
                with_api_key(segment_file_name(slot.run, index), api_key),
            );
        }
        playlist.ended = completed;

        Ok(playlist.render())
    }

    /// Contiguous segments of the slot's current run, or `None` when the
    /// quality has nothing to serve.
    async fn segment_count(&self, session: &Session, slot: &QualitySlot) -> Result<Option<u32>> {
        if matches!(slot.state, QualityState::Failed(_)) {
            return Ok(None);
        }
        let indices = present_indices(&session.quality_dir(slot.quality), slot.run).await?;
        let count = contiguous_prefix(&indices);
        if matches!(slot.state, QualityState::Errored(_)) && count == 0 {
            return Ok(None);
        }
        Ok(Some(count))
    }
}

fn with_api_key(uri: String, api_key: Option<&str>) -> String {
    match api_key {
        Some(key) => {
            let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
            format!("{uri}?api_key={encoded}")
        }
        None => uri,
    }
}

/// Duration of the final segment of a finished run, when the source length
/// allows computing it.
fn last_segment_duration(session: &Session, slot: &QualitySlot, count: u32, segment_secs: u32) -> f64 {
    let full = f64::from(segment_secs);
    let Some(duration) = session.source.duration_secs else {
        return full;
    };
    let remainder = duration - slot.run_offset_secs - f64::from(count - 1) * full;
    if remainder > 0.0 && remainder < full {
        remainder
    } else {
        full
    }
}

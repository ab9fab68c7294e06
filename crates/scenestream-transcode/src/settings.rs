//! Tunables shared by the transcoding components.

use std::path::PathBuf;
use std::time::Duration;

use crate::profile::Quality;

/// Runtime settings for sessions, encoders and segment serving.
#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    /// Root directory; each session gets `<work_dir>/<session_id>/`.
    pub work_dir: PathBuf,
    /// Target duration of every HLS segment, in seconds.
    pub segment_duration_secs: u32,
    /// Qualities used when a creation request names none.
    pub default_qualities: Vec<Quality>,
    /// x264 preset.
    pub video_preset: String,
    /// Seeks closer than this to the current offset keep the running encode.
    pub near_seek_threshold_secs: f64,
    /// How long a segment request waits for a not-yet-written file.
    pub segment_wait_timeout: Duration,
    /// Poll period while waiting for a segment file.
    pub segment_poll_interval: Duration,
    /// Minimum spacing between progress summaries in the log.
    pub progress_log_interval: Duration,
    /// Time between SIGTERM and SIGKILL when stopping an encoder.
    pub kill_grace_period: Duration,
    /// Lines of encoder diagnostics kept per process.
    pub diagnostic_buffer_lines: usize,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("scenestream"),
            segment_duration_secs: 4,
            default_qualities: vec![Quality::P720, Quality::P480],
            video_preset: "veryfast".to_string(),
            near_seek_threshold_secs: 30.0,
            segment_wait_timeout: Duration::from_secs(3),
            segment_poll_interval: Duration::from_millis(200),
            progress_log_interval: Duration::from_secs(30),
            kill_grace_period: Duration::from_secs(5),
            diagnostic_buffer_lines: 200,
        }
    }
}

impl TranscodeSettings {
    /// Suggested client retry delay for a segment that is still being encoded.
    pub fn retry_after_ms(&self) -> u64 {
        u64::from(self.segment_duration_secs) * 1000 / 2
    }
}

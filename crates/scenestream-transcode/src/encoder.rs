//! Encoder invocation: request shape, ffmpeg arguments and segment naming.
//!
//! Segment files are named `r<run>-<index>.ts`. The run number increases on
//! every seek-triggered restart so a new encode never overwrites the files of
//! an earlier one in the same quality directory.

use std::path::PathBuf;

use scenestream_common::SessionId;

use crate::profile::Quality;
use crate::settings::TranscodeSettings;

/// Everything needed to launch one encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    pub session_id: SessionId,
    pub quality: Quality,
    /// Encode-run counter for this quality within the session.
    pub run: u32,
    pub source_path: PathBuf,
    pub start_offset_secs: f64,
    /// `<session_dir>/<quality>/`
    pub output_dir: PathBuf,
}

/// A segment address within a quality: which encode run and which index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentRef {
    pub run: u32,
    pub index: u32,
}

impl SegmentRef {
    pub fn new(run: u32, index: u32) -> Self {
        Self { run, index }
    }

    /// File name on disk and in manifests.
    pub fn file_name(&self) -> String {
        segment_file_name(self.run, self.index)
    }

    /// Parse `r<run>-<index>.ts`.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_prefix('r')?.strip_suffix(".ts")?;
        let (run, index) = stem.split_once('-')?;
        if run.is_empty() || index.is_empty() {
            return None;
        }
        if !run.bytes().all(|b| b.is_ascii_digit()) || !index.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        Some(Self {
            run: run.parse().ok()?,
            index: index.parse().ok()?,
        })
    }
}

impl std::fmt::Display for SegmentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Segment file name for a run and index.
pub fn segment_file_name(run: u32, index: u32) -> String {
    format!("r{run}-{index}.ts")
}

/// Build the ffmpeg argument list for an encode request.
///
/// Input seeking (`-ss` before `-i`) keeps far seeks fast. Keyframes are
/// forced on segment boundaries so every segment starts independently, and
/// `temp_file` makes each segment appear under its final name only once it
/// is complete.
pub fn ffmpeg_args(request: &EncodeRequest, settings: &TranscodeSettings) -> Vec<String> {
    let profile = request.quality.profile();
    let segment_secs = settings.segment_duration_secs.to_string();
    let segment_pattern = request
        .output_dir
        .join(format!("r{}-%d.ts", request.run));
    let encoder_playlist = request.output_dir.join(format!("r{}.m3u8", request.run));

    let mut args: Vec<String> = Vec::with_capacity(64);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    push(&["-hide_banner", "-nostdin", "-loglevel", "level+info"]);
    push(&["-progress", "pipe:2", "-nostats"]);

    push(&["-ss", &format!("{:.3}", request.start_offset_secs.max(0.0))]);
    push(&["-i", &request.source_path.to_string_lossy()]);
    push(&["-map", "0:v:0", "-map", "0:a:0?"]);

    push(&["-c:v", "libx264", "-preset", &settings.video_preset]);
    push(&["-profile:v", "high", "-pix_fmt", "yuv420p"]);
    push(&[
        "-b:v",
        &format!("{}k", profile.video_bitrate_kbps),
        "-maxrate",
        &format!("{}k", profile.max_rate_kbps),
        "-bufsize",
        &format!("{}k", profile.buffer_size_kbps),
    ]);
    push(&["-vf", &format!("scale=-2:{}", profile.height)]);
    push(&[
        "-force_key_frames",
        &format!("expr:gte(t,n_forced*{segment_secs})"),
        "-sc_threshold",
        "0",
    ]);

    push(&[
        "-c:a",
        "aac",
        "-b:a",
        &format!("{}k", profile.audio_bitrate_kbps),
        "-ar",
        &profile.audio_sample_rate.to_string(),
        "-ac",
        "2",
    ]);

    push(&["-f", "hls", "-hls_time", &segment_secs]);
    push(&["-hls_list_size", "0", "-hls_playlist_type", "event"]);
    push(&["-hls_segment_type", "mpegts"]);
    push(&["-hls_flags", "temp_file+independent_segments"]);
    push(&["-start_number", "0"]);
    push(&["-hls_segment_filename", &segment_pattern.to_string_lossy()]);
    push(&["-y", &encoder_playlist.to_string_lossy()]);

    args
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use scenestream_transcode::{Quality, TranscodeSettings};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub janitor: JanitorConfig,

    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Require an API key on every `/api` route
    #[serde(default)]
    pub enabled: bool,

    /// Accepted keys and the user each one authenticates as
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub user_id: uuid::Uuid,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    /// Explicit ffmpeg binary; discovered on PATH when unset
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u32,

    #[serde(default = "default_qualities")]
    pub default_qualities: Vec<String>,

    #[serde(default = "default_video_preset")]
    pub video_preset: String,

    #[serde(default = "default_near_seek_threshold")]
    pub near_seek_threshold_secs: f64,

    #[serde(default = "default_segment_wait_timeout")]
    pub segment_wait_timeout_ms: u64,

    #[serde(default = "default_segment_poll_interval")]
    pub segment_poll_interval_ms: u64,

    #[serde(default = "default_progress_log_interval")]
    pub progress_log_interval_secs: u64,

    #[serde(default = "default_kill_grace_period")]
    pub kill_grace_period_secs: u64,

    #[serde(default = "default_diagnostic_buffer_lines")]
    pub diagnostic_buffer_lines: usize,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/tmp/scenestream")
}
fn default_segment_duration() -> u32 {
    4
}
fn default_qualities() -> Vec<String> {
    vec!["720p".to_string(), "480p".to_string()]
}
fn default_video_preset() -> String {
    "veryfast".to_string()
}
fn default_near_seek_threshold() -> f64 {
    30.0
}
fn default_segment_wait_timeout() -> u64 {
    3000
}
fn default_segment_poll_interval() -> u64 {
    200
}
fn default_progress_log_interval() -> u64 {
    30
}
fn default_kill_grace_period() -> u64 {
    5
}
fn default_diagnostic_buffer_lines() -> usize {
    200
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            work_dir: default_work_dir(),
            segment_duration_secs: default_segment_duration(),
            default_qualities: default_qualities(),
            video_preset: default_video_preset(),
            near_seek_threshold_secs: default_near_seek_threshold(),
            segment_wait_timeout_ms: default_segment_wait_timeout(),
            segment_poll_interval_ms: default_segment_poll_interval(),
            progress_log_interval_secs: default_progress_log_interval(),
            kill_grace_period_secs: default_kill_grace_period(),
            diagnostic_buffer_lines: default_diagnostic_buffer_lines(),
        }
    }
}

impl TranscodeConfig {
    /// Runtime settings for the transcoding core.
    ///
    /// Quality labels must already have been validated.
    pub fn to_settings(&self) -> scenestream_common::Result<TranscodeSettings> {
        Ok(TranscodeSettings {
            work_dir: self.work_dir.clone(),
            segment_duration_secs: self.segment_duration_secs,
            default_qualities: scenestream_transcode::profile::parse_qualities(
                &self.default_qualities,
            )?,
            video_preset: self.video_preset.clone(),
            near_seek_threshold_secs: self.near_seek_threshold_secs,
            segment_wait_timeout: Duration::from_millis(self.segment_wait_timeout_ms),
            segment_poll_interval: Duration::from_millis(self.segment_poll_interval_ms),
            progress_log_interval: Duration::from_secs(self.progress_log_interval_secs),
            kill_grace_period: Duration::from_secs(self.kill_grace_period_secs),
            diagnostic_buffer_lines: self.diagnostic_buffer_lines,
        })
    }

    pub fn parsed_default_qualities(&self) -> scenestream_common::Result<Vec<Quality>> {
        scenestream_transcode::profile::parse_qualities(&self.default_qualities)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JanitorConfig {
    #[serde(default = "default_janitor_interval")]
    pub interval_secs: u64,

    /// Sessions untouched for longer than this are reclaimed
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,
}

fn default_janitor_interval() -> u64 {
    300
}
fn default_idle_threshold() -> u64 {
    1800
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_janitor_interval(),
            idle_threshold_secs: default_idle_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Scenes listed in the config file
    #[default]
    Static,
    /// Scenes looked up in a Stash instance over GraphQL
    Stash,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// GraphQL endpoint (stash)
    #[serde(default)]
    pub url: Option<String>,

    /// Sent as the `ApiKey` header (stash)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Static scene table
    #[serde(default)]
    pub scenes: Vec<SceneConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneConfig {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

//! Encoder binary discovery.

use std::path::{Path, PathBuf};
use std::process::Command;

/// What we know about the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Resolve ffmpeg, preferring a configured path over a PATH lookup.
pub fn resolve_ffmpeg(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!("Configured ffmpeg not found at {:?}, searching PATH", path);
    }
    which::which("ffmpeg").ok()
}

/// Run `ffmpeg -version` against the resolved binary.
pub fn check_ffmpeg(configured: Option<&Path>) -> ToolInfo {
    let Some(path) = resolve_ffmpeg(configured) else {
        return ToolInfo {
            name: "ffmpeg".to_string(),
            available: false,
            version: None,
            path: None,
        };
    };

    match Command::new(&path).arg("-version").output() {
        Ok(output) if output.status.success() => ToolInfo {
            name: "ffmpeg".to_string(),
            available: true,
            version: String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string()),
            path: Some(path),
        },
        _ => ToolInfo {
            name: "ffmpeg".to_string(),
            available: false,
            version: None,
            path: Some(path),
        },
    }
}

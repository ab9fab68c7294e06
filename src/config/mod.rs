mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Parse and validate configuration text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./scenestream.toml",
        "~/.config/scenestream/config.toml",
        "/etc/scenestream/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    // Validate server config
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let auth = &config.server.auth;
    if auth.enabled && auth.api_keys.is_empty() {
        anyhow::bail!("Authentication is enabled but no API keys are configured");
    }
    if auth.api_keys.iter().any(|k| k.key.trim().is_empty()) {
        anyhow::bail!("API keys cannot be empty");
    }

    // Validate transcode config
    let t = &config.transcode;
    if t.segment_duration_secs == 0 {
        anyhow::bail!("transcode.segment_duration_secs cannot be 0");
    }
    if t.segment_poll_interval_ms == 0 {
        anyhow::bail!("transcode.segment_poll_interval_ms cannot be 0");
    }
    if t.segment_poll_interval_ms > t.segment_wait_timeout_ms {
        anyhow::bail!(
            "transcode.segment_poll_interval_ms ({}) exceeds segment_wait_timeout_ms ({})",
            t.segment_poll_interval_ms,
            t.segment_wait_timeout_ms
        );
    }
    if !t.near_seek_threshold_secs.is_finite() || t.near_seek_threshold_secs < 0.0 {
        anyhow::bail!("transcode.near_seek_threshold_secs must be a non-negative number");
    }
    if t.default_qualities.is_empty() {
        anyhow::bail!("transcode.default_qualities cannot be empty");
    }
    t.parsed_default_qualities()
        .context("transcode.default_qualities")?;

    if let Some(ref ffmpeg) = t.ffmpeg_path {
        if !ffmpeg.exists() {
            tracing::warn!("Configured ffmpeg does not exist: {:?}", ffmpeg);
        }
    }

    // Validate janitor config
    if config.janitor.interval_secs == 0 {
        anyhow::bail!("janitor.interval_secs cannot be 0");
    }
    if config.janitor.idle_threshold_secs == 0 {
        anyhow::bail!("janitor.idle_threshold_secs cannot be 0");
    }

    // Validate source config
    match config.source.kind {
        SourceKind::Stash => {
            if config.source.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                anyhow::bail!("Stash source requires source.url");
            }
        }
        SourceKind::Static => {
            for scene in &config.source.scenes {
                if scene.duration_secs.is_some_and(|d| !d.is_finite() || d <= 0.0) {
                    anyhow::bail!("Scene '{}' has an invalid duration", scene.id);
                }
            }
        }
    }

    Ok(())
}

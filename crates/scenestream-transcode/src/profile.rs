//! Quality profile table.
//!
//! Maps each rendition label to its target resolution, video rate-control
//! bounds and audio settings. The table is static; encoders and manifests
//! both read from it so declared bandwidth always matches what is encoded.

use std::fmt;
use std::str::FromStr;

use scenestream_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// A named encoding rendition offered as one adaptive variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Quality {
    /// 3840x2160
    P2160,
    /// 1920x1080
    P1080,
    /// 1280x720
    P720,
    /// 854x480
    P480,
    /// 640x360
    P360,
    /// 426x240
    P240,
}

impl Quality {
    /// Every quality, highest first.
    pub const ALL: [Quality; 6] = [
        Quality::P2160,
        Quality::P1080,
        Quality::P720,
        Quality::P480,
        Quality::P360,
        Quality::P240,
    ];

    /// The label used in configuration, URLs and manifests (e.g. `720p`).
    pub fn label(&self) -> &'static str {
        match self {
            Quality::P2160 => "2160p",
            Quality::P1080 => "1080p",
            Quality::P720 => "720p",
            Quality::P480 => "480p",
            Quality::P360 => "360p",
            Quality::P240 => "240p",
        }
    }

    /// The encoding profile for this quality.
    pub fn profile(&self) -> &'static QualityProfile {
        match self {
            Quality::P2160 => &PROFILES[0],
            Quality::P1080 => &PROFILES[1],
            Quality::P720 => &PROFILES[2],
            Quality::P480 => &PROFILES[3],
            Quality::P360 => &PROFILES[4],
            Quality::P240 => &PROFILES[5],
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Quality::ALL
            .into_iter()
            .find(|q| q.label() == normalized)
            .ok_or_else(|| Error::Validation(format!("unknown quality '{}'", s.trim())))
    }
}

impl TryFrom<String> for Quality {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Quality> for String {
    fn from(q: Quality) -> Self {
        q.label().to_string()
    }
}

/// Target encoding parameters for one quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityProfile {
    pub quality: Quality,
    pub width: u32,
    pub height: u32,
    /// Average video bitrate in kbps.
    pub video_bitrate_kbps: u32,
    /// Peak video bitrate in kbps (`-maxrate`).
    pub max_rate_kbps: u32,
    /// Rate-control buffer in kbits (`-bufsize`).
    pub buffer_size_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub audio_sample_rate: u32,
}

impl QualityProfile {
    /// Bandwidth declared in the master manifest, in bits per second.
    pub fn bandwidth_bps(&self) -> u64 {
        (u64::from(self.video_bitrate_kbps) + u64::from(self.audio_bitrate_kbps)) * 1000
    }
}

static PROFILES: [QualityProfile; 6] = [
    QualityProfile {
        quality: Quality::P2160,
        width: 3840,
        height: 2160,
        video_bitrate_kbps: 16000,
        max_rate_kbps: 17120,
        buffer_size_kbps: 32000,
        audio_bitrate_kbps: 192,
        audio_sample_rate: 48000,
    },
    QualityProfile {
        quality: Quality::P1080,
        width: 1920,
        height: 1080,
        video_bitrate_kbps: 5000,
        max_rate_kbps: 5350,
        buffer_size_kbps: 10000,
        audio_bitrate_kbps: 192,
        audio_sample_rate: 48000,
    },
    QualityProfile {
        quality: Quality::P720,
        width: 1280,
        height: 720,
        video_bitrate_kbps: 2800,
        max_rate_kbps: 2996,
        buffer_size_kbps: 5600,
        audio_bitrate_kbps: 128,
        audio_sample_rate: 48000,
    },
    QualityProfile {
        quality: Quality::P480,
        width: 854,
        height: 480,
        video_bitrate_kbps: 1400,
        max_rate_kbps: 1498,
        buffer_size_kbps: 2800,
        audio_bitrate_kbps: 128,
        audio_sample_rate: 44100,
    },
    QualityProfile {
        quality: Quality::P360,
        width: 640,
        height: 360,
        video_bitrate_kbps: 800,
        max_rate_kbps: 856,
        buffer_size_kbps: 1600,
        audio_bitrate_kbps: 96,
        audio_sample_rate: 44100,
    },
    QualityProfile {
        quality: Quality::P240,
        width: 426,
        height: 240,
        video_bitrate_kbps: 400,
        max_rate_kbps: 428,
        buffer_size_kbps: 800,
        audio_bitrate_kbps: 64,
        audio_sample_rate: 44100,
    },
];

/// The full profile table, highest quality first.
pub fn profiles() -> &'static [QualityProfile] {
    &PROFILES
}

/// Parse a list of labels, collapsing duplicates and keeping first-seen order.
pub fn parse_qualities<S: AsRef<str>>(labels: &[S]) -> Result<Vec<Quality>> {
    let parsed = labels
        .iter()
        .map(|l| l.as_ref().parse())
        .collect::<Result<Vec<Quality>>>()?;
    Ok(dedup_qualities(&parsed))
}

/// Remove repeated qualities, keeping the first occurrence of each.
pub fn dedup_qualities(qualities: &[Quality]) -> Vec<Quality> {
    let mut out = Vec::with_capacity(qualities.len());
    for q in qualities {
        if !out.contains(q) {
            out.push(*q);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_quality_maps_to_its_own_profile() {
        for q in Quality::ALL {
            assert_eq!(q.profile().quality, q);
        }
    }

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!("720p".parse::<Quality>().unwrap(), Quality::P720);
        assert_eq!(" 1080P ".parse::<Quality>().unwrap(), Quality::P1080);
        assert!("720".parse::<Quality>().is_err());
        assert!("hd".parse::<Quality>().is_err());
    }

    #[test]
    fn table_is_ordered_by_descending_bandwidth() {
        let bandwidths: Vec<u64> = profiles().iter().map(|p| p.bandwidth_bps()).collect();
        let mut sorted = bandwidths.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(bandwidths, sorted);
    }

    #[test]
    fn bandwidth_includes_audio() {
        assert_eq!(Quality::P720.profile().bandwidth_bps(), 2_928_000);
        assert_eq!(Quality::P480.profile().bandwidth_bps(), 1_528_000);
    }

    #[test]
    fn rate_bounds_are_consistent() {
        for p in profiles() {
            assert!(p.max_rate_kbps >= p.video_bitrate_kbps, "{}", p.quality);
            assert!(p.buffer_size_kbps >= p.max_rate_kbps, "{}", p.quality);
            assert_eq!(p.height % 2, 0);
        }
    }

    #[test]
    fn parse_qualities_dedups_in_order() {
        let parsed = parse_qualities(&["480p", "720p", "480P"]).unwrap();
        assert_eq!(parsed, vec![Quality::P480, Quality::P720]);
    }

    #[test]
    fn parse_qualities_rejects_unknown_labels() {
        let err = parse_qualities(&["720p", "8k"]).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: unknown quality '8k'");
    }

    #[test]
    fn quality_serializes_as_label() {
        let json = serde_json::to_string(&vec![Quality::P720, Quality::P240]).unwrap();
        assert_eq!(json, r#"["720p","240p"]"#);
        let back: Vec<Quality> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Quality::P720, Quality::P240]);
    }
}

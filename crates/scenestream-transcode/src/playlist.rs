//! M3U8 playlist rendering.

use std::fmt::Write;

/// Codec string advertised for every variant (H.264 High 4.0 + AAC-LC).
pub const DEFAULT_CODECS: &str = "avc1.640028,mp4a.40.2";

/// Playlist type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    /// Segments are only ever appended.
    Event,
}

/// A segment entry in a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    /// Duration in seconds.
    pub duration: f64,
    /// Segment URI, relative to the playlist.
    pub uri: String,
}

/// Media playlist for a single rendition.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    /// Target duration in seconds.
    pub target_duration: u32,
    pub media_sequence: u32,
    pub playlist_type: PlaylistType,
    pub segments: Vec<SegmentEntry>,
    /// Whether to emit `#EXT-X-ENDLIST`.
    pub ended: bool,
}

impl MediaPlaylist {
    /// An open-ended playlist that grows while the encoder runs.
    pub fn event(target_duration: u32) -> Self {
        Self {
            target_duration,
            media_sequence: 0,
            playlist_type: PlaylistType::Event,
            segments: Vec::new(),
            ended: false,
        }
    }

    pub fn push(&mut self, duration: f64, uri: impl Into<String>) {
        self.segments.push(SegmentEntry {
            duration,
            uri: uri.into(),
        });
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:3").unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration).unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence).unwrap();

        match self.playlist_type {
            PlaylistType::Vod => writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD").unwrap(),
            PlaylistType::Event => writeln!(out, "#EXT-X-PLAYLIST-TYPE:EVENT").unwrap(),
        }

        writeln!(out, "#EXT-X-INDEPENDENT-SEGMENTS").unwrap();

        for segment in &self.segments {
            writeln!(out, "#EXTINF:{:.6},", segment.duration).unwrap();
            writeln!(out, "{}", segment.uri).unwrap();
        }

        if self.ended {
            writeln!(out, "#EXT-X-ENDLIST").unwrap();
        }

        out
    }
}

/// Stream variant information.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Variant name (the quality label).
    pub name: String,
    /// Playlist URI, relative to the master.
    pub uri: String,
    /// Bandwidth in bits per second.
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    /// Codec string (e.g., "avc1.640028,mp4a.40.2").
    pub codecs: String,
}

/// Master playlist with multiple renditions.
#[derive(Debug, Clone, Default)]
pub struct MasterPlaylist {
    pub streams: Vec<StreamInfo>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream variant.
    pub fn add_stream(mut self, stream: StreamInfo) -> Self {
        self.streams.push(stream);
        self
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:3").unwrap();

        for stream in &self.streams {
            write!(
                out,
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
                stream.bandwidth, stream.width, stream.height
            )
            .unwrap();

            if !stream.codecs.is_empty() {
                write!(out, ",CODECS=\"{}\"", stream.codecs).unwrap();
            }
            write!(out, ",NAME=\"{}\"", stream.name).unwrap();

            writeln!(out).unwrap();
            writeln!(out, "{}", stream.uri).unwrap();
        }

        out
    }
}

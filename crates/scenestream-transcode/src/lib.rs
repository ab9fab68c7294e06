//! # scenestream-transcode
//!
//! On-demand transcoding sessions for adaptive (HLS) playback.
//!
//! This crate provides:
//!
//! - **Quality profiles** ([`Quality`], [`QualityProfile`]) -- the static table
//!   of rendition resolutions and bitrates.
//! - **Encoder supervision** ([`EncoderSupervisor`], [`FfmpegSupervisor`]) --
//!   one external encoder per (session, quality), with diagnostic capture,
//!   throttled progress logging, graceful termination and exit events.
//! - **Session registry** ([`SessionStore`]) -- per-session locking, lifecycle
//!   state, last-access tracking and idempotent termination.
//! - **Manifests** ([`ManifestBuilder`]) -- master and per-quality playlists
//!   built from what is actually on disk.
//! - **Segments** ([`SegmentServer`]) -- bounded waiting for segments the
//!   encoder has not written yet.
//! - **Seeking** ([`SeekCoordinator`]) -- near seeks reuse the running encode,
//!   far seeks restart every quality at the new offset.
//! - **Reclamation** ([`Janitor`], [`reconcile_orphans`]) -- idle sweeps and
//!   startup cleanup of encoders left behind by a previous process.

pub mod diagnostics;
pub mod encoder;
pub mod janitor;
pub mod manifest;
pub mod playlist;
pub mod profile;
pub mod reconcile;
pub mod seek;
pub mod segments;
pub mod session;
pub mod settings;
pub mod store;
pub mod supervisor;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// ---- Re-exports for convenience ----

pub use encoder::{EncodeRequest, SegmentRef};
pub use janitor::Janitor;
pub use manifest::ManifestBuilder;
pub use profile::{Quality, QualityProfile};
pub use reconcile::{reconcile_orphans, ReconcileReport};
pub use seek::{SeekCoordinator, SeekOutcome};
pub use segments::SegmentServer;
pub use session::{QualityState, SessionSnapshot, SessionState, SourceMedia};
pub use settings::TranscodeSettings;
pub use store::{NewSession, SessionStore};
pub use supervisor::{EncoderEvent, EncoderHandle, EncoderSupervisor, FfmpegSupervisor};

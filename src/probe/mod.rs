//! Container-level track inspection.
//!
//! Classifies a local media file's streams by probing the container
//! with ffprobe, without decoding. Inspection is all-or-nothing: an
//! unreadable or corrupt file yields a `ProbeFailed` error and no
//! partial result.

mod ffprobe;

use crate::config::TrackDefaults;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Media kind of a probed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => write!(f, "Video"),
            TrackKind::Audio => write!(f, "Audio"),
            TrackKind::Subtitle => write!(f, "Subtitle"),
        }
    }
}

/// The primary video stream of a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTrack {
    /// Global stream index in the container.
    pub index: u32,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
}

/// One audio stream, with metadata defaults applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Global stream index in the container.
    pub index: u32,
    pub codec: String,
    pub language: String,
    pub title: String,
    pub channels: Option<u32>,
    pub default: bool,
}

/// One subtitle stream, with metadata defaults applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleTrack {
    /// Global stream index in the container.
    pub index: u32,
    pub codec: String,
    pub language: String,
    pub title: String,
    pub default: bool,
    pub forced: bool,
}

/// Everything the packager needs to know about a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackInfo {
    pub container: String,
    pub duration_secs: Option<f64>,
    pub video: Option<VideoTrack>,
    pub audio: Vec<AudioTrack>,
    pub subtitles: Vec<SubtitleTrack>,
}

impl TrackInfo {
    /// Probed height of the primary video stream, if any.
    pub fn source_height(&self) -> Option<u32> {
        self.video.as_ref().map(|v| v.height)
    }
}

/// Probes local media files via ffprobe.
#[derive(Debug, Clone, Default)]
pub struct TrackInspector {
    defaults: TrackDefaults,
}

impl TrackInspector {
    pub fn new(defaults: TrackDefaults) -> Self {
        Self { defaults }
    }

    /// Enumerate the file's tracks without decoding.
    pub async fn inspect(&self, path: &Path) -> Result<TrackInfo> {
        ffprobe::probe(path, &self.defaults).await
    }
}

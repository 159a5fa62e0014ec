use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub packaging: PackagingConfig,

    #[serde(default)]
    pub tracks: TrackDefaults,
}

/// Storage root and retention policy for per-job directories.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Minutes a job directory may sit untouched before the sweep removes it.
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u64,

    /// Minutes between eviction sweep passes.
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("./streams")
}
fn default_retention_minutes() -> u64 {
    30
}
fn default_sweep_interval_minutes() -> u64 {
    5
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            retention_minutes: default_retention_minutes(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Bound on connect + response time, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay after the write handle closes before the file is handed to
    /// consumers, covering filesystem-visibility latency.
    #[serde(default = "default_grace_delay_ms")]
    pub grace_delay_ms: u64,

    /// Log a progress line roughly every this many bytes.
    #[serde(default = "default_progress_log_bytes")]
    pub progress_log_bytes: u64,

    /// Some upstream hosts reject non-browser clients.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_grace_delay_ms() -> u64 {
    500
}
fn default_progress_log_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            grace_delay_ms: default_grace_delay_ms(),
            progress_log_bytes: default_progress_log_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackagingConfig {
    /// Target segment duration in seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u32,

    /// Video bitrate for the single-rendition path (e.g. "2000k").
    /// Also feeds the bandwidth estimate when the video is copied.
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,

    /// Audio bitrate for the single-rendition path (e.g. "128k").
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Downmix target channel count.
    #[serde(default = "default_audio_channels")]
    pub audio_channels: u32,

    /// Drop subtitle streams from the transcode output.
    #[serde(default = "default_skip_subtitles")]
    pub skip_subtitles: bool,

    /// x264 preset used when the video must be re-encoded.
    #[serde(default = "default_video_preset")]
    pub video_preset: String,

    /// x264 CRF used when the video must be re-encoded.
    #[serde(default = "default_video_crf")]
    pub video_crf: u32,

    /// Source video codecs that can be copied into MPEG-TS segments
    /// without re-encoding.
    #[serde(default = "default_copy_codecs")]
    pub copy_compatible_codecs: Vec<String>,

    /// Adaptive quality ladder, highest rung first.
    #[serde(default = "default_ladder")]
    pub ladder: Vec<QualityPreset>,
}

fn default_segment_duration() -> u32 {
    6
}
fn default_video_bitrate() -> String {
    "2000k".to_string()
}
fn default_audio_bitrate() -> String {
    "128k".to_string()
}
fn default_audio_channels() -> u32 {
    2
}
fn default_skip_subtitles() -> bool {
    true
}
fn default_video_preset() -> String {
    "fast".to_string()
}
fn default_video_crf() -> u32 {
    23
}
fn default_copy_codecs() -> Vec<String> {
    vec!["h264".to_string()]
}

fn default_ladder() -> Vec<QualityPreset> {
    vec![
        QualityPreset {
            name: "1080p".to_string(),
            width: 1920,
            height: 1080,
            video_bitrate: "5000k".to_string(),
            audio_bitrate: "192k".to_string(),
        },
        QualityPreset {
            name: "720p".to_string(),
            width: 1280,
            height: 720,
            video_bitrate: "2500k".to_string(),
            audio_bitrate: "128k".to_string(),
        },
        QualityPreset {
            name: "480p".to_string(),
            width: 854,
            height: 480,
            video_bitrate: "1000k".to_string(),
            audio_bitrate: "96k".to_string(),
        },
    ]
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: default_segment_duration(),
            video_bitrate: default_video_bitrate(),
            audio_bitrate: default_audio_bitrate(),
            audio_channels: default_audio_channels(),
            skip_subtitles: default_skip_subtitles(),
            video_preset: default_video_preset(),
            video_crf: default_video_crf(),
            copy_compatible_codecs: default_copy_codecs(),
            ladder: default_ladder(),
        }
    }
}

/// One target rendition of the adaptive ladder.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QualityPreset {
    /// Quality label, also the output subdirectory name.
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

/// Fallbacks applied when the source container omits track metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackDefaults {
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "unknown".to_string()
}

impl Default for TrackDefaults {
    fn default() -> Self {
        Self {
            language: default_language(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.retention_minutes, 30);
        assert_eq!(config.storage.sweep_interval_minutes, 5);
        assert_eq!(config.download.timeout_secs, 30);
        assert_eq!(config.packaging.segment_duration_secs, 6);
        assert_eq!(config.tracks.language, "unknown");
    }

    #[test]
    fn test_default_ladder_shape() {
        let ladder = default_ladder();
        assert_eq!(ladder.len(), 3);
        assert_eq!(ladder[0].name, "1080p");
        assert_eq!(ladder[2].height, 480);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            retention_minutes = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.retention_minutes, 10);
        assert_eq!(config.storage.sweep_interval_minutes, 5);
        assert_eq!(config.packaging.ladder.len(), 3);
    }
}

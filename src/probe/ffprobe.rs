//! FFprobe subprocess invocation and output parsing.

use super::{AudioTrack, SubtitleTrack, TrackInfo, TrackKind, VideoTrack};
use crate::config::TrackDefaults;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    forced: u8,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
    title: Option<String>,
}

/// Probe a media file using ffprobe.
pub async fn probe(path: &Path, defaults: &TrackDefaults) -> Result<TrackInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::probe("ffprobe not found on PATH")
            } else {
                Error::probe(e.to_string())
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::probe(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let ff_output: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::probe(format!("unparseable ffprobe output: {}", e)))?;

    debug!(
        path = %path.display(),
        container = %ff_output.format.format_name,
        duration = ff_output.format.duration.as_deref().unwrap_or("?"),
        size = ff_output.format.size.as_deref().unwrap_or("?"),
        "Probed source file"
    );

    Ok(parse_output(ff_output, defaults))
}

fn parse_output(output: FfprobeOutput, defaults: &TrackDefaults) -> TrackInfo {
    let mut info = TrackInfo {
        container: output.format.format_name,
        duration_secs: output.format.duration.and_then(|s| s.parse().ok()),
        video: None,
        audio: Vec::new(),
        subtitles: Vec::new(),
    };

    for stream in output.streams {
        match stream.codec_type.as_str() {
            // First video stream wins; covers and thumbnails come later.
            "video" if info.video.is_none() => {
                info.video = Some(VideoTrack {
                    index: stream.index,
                    codec: stream.codec_name.unwrap_or_default(),
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                    frame_rate: stream.r_frame_rate.and_then(|s| parse_frame_rate(&s)),
                });
            }
            "audio" => {
                info.audio.push(AudioTrack {
                    index: stream.index,
                    codec: stream.codec_name.unwrap_or_default(),
                    language: stream
                        .tags
                        .language
                        .unwrap_or_else(|| defaults.language.clone()),
                    title: stream
                        .tags
                        .title
                        .unwrap_or_else(|| fallback_title(TrackKind::Audio, stream.index)),
                    channels: stream.channels,
                    default: stream.disposition.default == 1,
                });
            }
            "subtitle" => {
                info.subtitles.push(SubtitleTrack {
                    index: stream.index,
                    codec: stream.codec_name.unwrap_or_default(),
                    language: stream
                        .tags
                        .language
                        .unwrap_or_else(|| defaults.language.clone()),
                    title: stream
                        .tags
                        .title
                        .unwrap_or_else(|| fallback_title(TrackKind::Subtitle, stream.index)),
                    default: stream.disposition.default == 1,
                    forced: stream.disposition.forced == 1,
                });
            }
            _ => {}
        }
    }

    info
}

/// Title used when the container carries no title tag.
fn fallback_title(kind: TrackKind, index: u32) -> String {
    format!("{} {}", kind, index)
}

fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    let parts: Vec<&str> = rate_str.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().ok()?;
        let den: f64 = parts[1].parse().ok()?;
        if den != 0.0 {
            return Some(num / den);
        }
    }
    rate_str.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "format": {
            "format_name": "matroska,webm",
            "duration": "1420.375000",
            "size": "734003200"
        },
        "streams": [
            {
                "index": 0,
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1280,
                "height": 720,
                "r_frame_rate": "24000/1001"
            },
            {
                "index": 1,
                "codec_type": "audio",
                "codec_name": "aac",
                "channels": 2,
                "disposition": { "default": 1 },
                "tags": { "language": "jpn", "title": "Japanese" }
            },
            {
                "index": 2,
                "codec_type": "audio",
                "codec_name": "aac",
                "channels": 2
            },
            {
                "index": 3,
                "codec_type": "subtitle",
                "codec_name": "ass",
                "disposition": { "forced": 1 },
                "tags": { "language": "eng" }
            }
        ]
    }"#;

    fn parse_sample() -> TrackInfo {
        let output: FfprobeOutput = serde_json::from_str(SAMPLE).unwrap();
        parse_output(output, &TrackDefaults::default())
    }

    #[test]
    fn test_classifies_streams() {
        let info = parse_sample();
        let video = info.video.as_ref().unwrap();
        assert_eq!(video.codec, "h264");
        assert_eq!((video.width, video.height), (1280, 720));
        assert!((video.frame_rate.unwrap() - 23.976).abs() < 0.001);
        assert_eq!(info.audio.len(), 2);
        assert_eq!(info.subtitles.len(), 1);
        assert_eq!(info.container, "matroska,webm");
        assert_eq!(info.source_height(), Some(720));
    }

    #[test]
    fn test_tagged_metadata_passes_through() {
        let info = parse_sample();
        let tagged = &info.audio[0];
        assert_eq!(tagged.language, "jpn");
        assert_eq!(tagged.title, "Japanese");
        assert!(tagged.default);
    }

    #[test]
    fn test_metadata_defaults_applied() {
        let info = parse_sample();
        let untagged = &info.audio[1];
        assert_eq!(untagged.language, "unknown");
        assert_eq!(untagged.title, "Audio 2");
        assert!(!untagged.default);

        let sub = &info.subtitles[0];
        assert_eq!(sub.title, "Subtitle 3");
        assert!(sub.forced);
    }

    #[test]
    fn test_configured_default_language() {
        let output: FfprobeOutput = serde_json::from_str(SAMPLE).unwrap();
        let defaults = TrackDefaults {
            language: "und".to_string(),
        };
        let info = parse_output(output, &defaults);
        assert_eq!(info.audio[1].language, "und");
    }

    #[test]
    fn test_fallback_title_per_kind() {
        assert_eq!(fallback_title(TrackKind::Audio, 2), "Audio 2");
        assert_eq!(fallback_title(TrackKind::Subtitle, 3), "Subtitle 3");
        assert_eq!(fallback_title(TrackKind::Video, 0), "Video 0");
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("invalid"), None);
    }
}

//! Segmented playlist generation via ffmpeg.
//!
//! Each rendition is produced by one ffmpeg invocation writing a VOD
//! media playlist plus deterministic, zero-padded MPEG-TS segments.
//! The adaptive path runs one invocation per surviving ladder rung and
//! ties the results together with a master playlist.

use super::playlist::{parse_bitrate, MasterPlaylist, MediaGroupEntry, VariantStream};
use crate::config::{PackagingConfig, QualityPreset};
use crate::error::{Error, Result};
use crate::probe::TrackInfo;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// How many subprocess log lines to retain for failure reports.
const LOG_TAIL_LINES: usize = 40;

/// One log line forwarded from the transcoding subprocess.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Rendition label ("source" for the single-rendition path).
    pub rendition: String,
    pub line: String,
}

/// Result of packaging one rendition plus its master playlist.
#[derive(Debug, Clone, Serialize)]
pub struct SingleRenditionOutput {
    pub media_playlist: PathBuf,
    pub master_playlist: PathBuf,
    pub tracks: TrackInfo,
}

/// One successfully packaged ladder rung.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveVariant {
    pub preset: QualityPreset,
    pub media_playlist: PathBuf,
}

/// Result of packaging the full adaptive ladder.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveOutput {
    pub variants: Vec<AdaptiveVariant>,
    pub master_playlist: PathBuf,
}

/// Encoding target for one ffmpeg invocation.
struct RenditionTarget {
    label: String,
    video_bitrate: String,
    audio_bitrate: String,
    /// Cap resolution at width x height (never upscales). `None` keeps
    /// the source resolution and allows codec passthrough.
    scale: Option<(u32, u32)>,
}

/// Packages local media files into segmented HLS playlists.
#[derive(Clone)]
pub struct PlaylistPackager {
    config: PackagingConfig,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl PlaylistPackager {
    pub fn new(config: PackagingConfig) -> Self {
        Self {
            config,
            progress: None,
        }
    }

    /// Forward subprocess log lines to `progress` as they arrive.
    pub fn with_progress(
        config: PackagingConfig,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            config,
            progress: Some(progress),
        }
    }

    /// Package the source as one rendition and emit a master playlist.
    ///
    /// The video is copied when its codec is already segment-compatible,
    /// otherwise re-encoded; the first audio track is transcoded to the
    /// configured bitrate and channel layout; subtitle handling follows
    /// the configured policy.
    pub async fn package_single_rendition(
        &self,
        input: &Path,
        out_dir: &Path,
        tracks: &TrackInfo,
    ) -> Result<SingleRenditionOutput> {
        let target = RenditionTarget {
            label: "source".to_string(),
            video_bitrate: self.config.video_bitrate.clone(),
            audio_bitrate: self.config.audio_bitrate.clone(),
            scale: None,
        };

        let media_playlist = self.run_ffmpeg(input, out_dir, &target, tracks).await?;

        let bandwidth =
            parse_bitrate(&self.config.video_bitrate) + parse_bitrate(&self.config.audio_bitrate);
        let (width, height) = tracks
            .video
            .as_ref()
            .map(|v| (v.width, v.height))
            .unwrap_or((0, 0));

        let mut master = MasterPlaylist::new().add_variant(VariantStream {
            name: String::new(),
            uri: "stream.m3u8".to_string(),
            bandwidth,
            width,
            height,
            audio_group: (!tracks.audio.is_empty()).then(|| "audio".to_string()),
            subtitle_group: (!tracks.subtitles.is_empty()).then(|| "subs".to_string()),
        });

        master = self.add_media_groups(master, tracks);

        let master_playlist = out_dir.join("master.m3u8");
        fs::write(&master_playlist, master.render()).await?;

        info!(
            playlist = %master_playlist.display(),
            "Packaged single rendition"
        );

        Ok(SingleRenditionOutput {
            media_playlist,
            master_playlist,
            tracks: tracks.clone(),
        })
    }

    /// Package the configured quality ladder and emit a master playlist.
    ///
    /// Rungs taller than the probed source are skipped. If any surviving
    /// rung fails to transcode the whole job fails and no master
    /// playlist is written.
    pub async fn package_adaptive(
        &self,
        input: &Path,
        out_dir: &Path,
        tracks: &TrackInfo,
    ) -> Result<AdaptiveOutput> {
        let rungs = select_rungs(&self.config.ladder, tracks.source_height());
        if rungs.is_empty() {
            return Err(Error::packaging(
                None,
                "no ladder rung fits the source resolution",
            ));
        }

        let mut variants = Vec::with_capacity(rungs.len());

        for preset in rungs {
            let rung_dir = out_dir.join(&preset.name);
            let target = RenditionTarget {
                label: preset.name.clone(),
                video_bitrate: preset.video_bitrate.clone(),
                audio_bitrate: preset.audio_bitrate.clone(),
                scale: Some((preset.width, preset.height)),
            };

            info!(rendition = %preset.name, "Packaging ladder rung");

            match self.run_ffmpeg(input, &rung_dir, &target, tracks).await {
                Ok(media_playlist) => variants.push(AdaptiveVariant {
                    preset: preset.clone(),
                    media_playlist,
                }),
                Err(e) => {
                    // A failed rung aborts the whole job; its directory
                    // only holds partial output.
                    if let Err(cleanup_err) = fs::remove_dir_all(&rung_dir).await {
                        if cleanup_err.kind() != std::io::ErrorKind::NotFound {
                            warn!(
                                rendition = %preset.name,
                                error = %cleanup_err,
                                "Failed to remove partial rung directory"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        variants.sort_by_key(|v| {
            parse_bitrate(&v.preset.video_bitrate) + parse_bitrate(&v.preset.audio_bitrate)
        });

        let mut master = MasterPlaylist::new();
        for variant in &variants {
            master = master.add_variant(VariantStream {
                name: variant.preset.name.clone(),
                uri: format!("{}/stream.m3u8", variant.preset.name),
                bandwidth: parse_bitrate(&variant.preset.video_bitrate)
                    + parse_bitrate(&variant.preset.audio_bitrate),
                width: variant.preset.width,
                height: variant.preset.height,
                audio_group: None,
                subtitle_group: None,
            });
        }

        let master_playlist = out_dir.join("master.m3u8");
        fs::write(&master_playlist, master.render()).await?;

        info!(
            variants = variants.len(),
            playlist = %master_playlist.display(),
            "Packaged adaptive ladder"
        );

        Ok(AdaptiveOutput {
            variants,
            master_playlist,
        })
    }

    fn add_media_groups(&self, mut master: MasterPlaylist, tracks: &TrackInfo) -> MasterPlaylist {
        if !tracks.audio.is_empty() {
            // Exactly one default entry: the track flagged in the
            // container, or the first one.
            let default_index = tracks
                .audio
                .iter()
                .position(|t| t.default)
                .unwrap_or(0);

            for (i, track) in tracks.audio.iter().enumerate() {
                master = master.add_audio(MediaGroupEntry {
                    group_id: "audio".to_string(),
                    name: track.title.clone(),
                    language: track.language.clone(),
                    default: i == default_index,
                    uri: format!("audio_{}.m3u8", track.index),
                });
            }
        }

        // Subtitle listing is independent of the transcode skip policy:
        // the master advertises every subtitle stream the source has.
        for track in &tracks.subtitles {
            master = master.add_subtitle(MediaGroupEntry {
                group_id: "subs".to_string(),
                name: track.title.clone(),
                language: track.language.clone(),
                default: false,
                uri: format!("subtitle_{}.m3u8", track.index),
            });
        }

        master
    }

    /// Run one ffmpeg invocation, returning the media playlist path.
    ///
    /// Resolves only on a clean exit; on failure the rendition's partial
    /// artifacts are removed and the captured log tail is attached to
    /// the error.
    async fn run_ffmpeg(
        &self,
        input: &Path,
        out_dir: &Path,
        target: &RenditionTarget,
        tracks: &TrackInfo,
    ) -> Result<PathBuf> {
        fs::create_dir_all(out_dir).await?;

        let args = self.build_args(input, out_dir, target, tracks);
        debug!(rendition = %target.label, ?args, "Spawning ffmpeg");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::packaging(None, "ffmpeg not found on PATH")
                } else {
                    Error::packaging(None, e.to_string())
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::packaging(None, "failed to capture ffmpeg stderr"))?;

        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(LOG_TAIL_LINES);

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| Error::packaging(None, e.to_string()))?
        {
            trace!(rendition = %target.label, "ffmpeg: {}", line);
            if tail.len() == LOG_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());

            if let Some(ref progress) = self.progress {
                let _ = progress.send(ProgressEvent {
                    rendition: target.label.clone(),
                    line,
                });
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::packaging(None, e.to_string()))?;

        if !status.success() {
            let log: Vec<String> = tail.into();
            remove_packaging_artifacts(out_dir).await;
            return Err(Error::packaging(status.code(), log.join("\n")));
        }

        Ok(out_dir.join("stream.m3u8"))
    }

    fn build_args(
        &self,
        input: &Path,
        out_dir: &Path,
        target: &RenditionTarget,
        tracks: &TrackInfo,
    ) -> Vec<String> {
        let mut args = vec!["-i".to_string(), input.to_string_lossy().to_string()];

        if let Some(video) = &tracks.video {
            args.extend(["-map".to_string(), "0:v:0".to_string()]);

            let can_copy = target.scale.is_none()
                && self
                    .config
                    .copy_compatible_codecs
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&video.codec));

            if can_copy {
                args.extend(["-c:v".to_string(), "copy".to_string()]);
            } else {
                args.extend([
                    "-c:v".to_string(),
                    "libx264".to_string(),
                    "-preset".to_string(),
                    self.config.video_preset.clone(),
                    "-crf".to_string(),
                    self.config.video_crf.to_string(),
                    "-b:v".to_string(),
                    target.video_bitrate.clone(),
                ]);
                if let Some((width, height)) = target.scale {
                    // min() keeps the source size when the target is
                    // larger, so a retained rung never upscales.
                    args.extend([
                        "-vf".to_string(),
                        format!(
                            "scale='min({},iw)':'min({},ih)':force_original_aspect_ratio=decrease",
                            width, height
                        ),
                    ]);
                }
            }
        }

        if !tracks.audio.is_empty() {
            args.extend([
                "-map".to_string(),
                "0:a:0".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                target.audio_bitrate.clone(),
                "-ac".to_string(),
                self.config.audio_channels.to_string(),
            ]);
        }

        if self.config.skip_subtitles {
            args.push("-sn".to_string());
        }

        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.config.segment_duration_secs.to_string(),
            "-hls_playlist_type".to_string(),
            "vod".to_string(),
            "-hls_segment_type".to_string(),
            "mpegts".to_string(),
            "-hls_segment_filename".to_string(),
            out_dir.join("segment_%03d.ts").to_string_lossy().to_string(),
            "-hls_flags".to_string(),
            "independent_segments".to_string(),
            "-start_number".to_string(),
            "0".to_string(),
            "-y".to_string(),
            out_dir.join("stream.m3u8").to_string_lossy().to_string(),
        ]);

        args
    }
}

/// Ladder rungs that the source can serve without upscaling.
fn select_rungs(ladder: &[QualityPreset], source_height: Option<u32>) -> Vec<&QualityPreset> {
    ladder
        .iter()
        .filter(|preset| match source_height {
            Some(height) => preset.height <= height,
            None => true,
        })
        .collect()
}

/// Best-effort removal of a failed rendition's generated files.
///
/// Only playlist and segment files are touched; the downloaded source
/// shares the job root on the single-rendition path.
async fn remove_packaging_artifacts(out_dir: &Path) {
    let Ok(mut entries) = fs::read_dir(out_dir).await else {
        return;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let generated =
            name == "stream.m3u8" || (name.starts_with("segment_") && name.ends_with(".ts"));
        if generated {
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove partial artifact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{AudioTrack, SubtitleTrack, VideoTrack};

    fn tracks_720p() -> TrackInfo {
        TrackInfo {
            container: "matroska".to_string(),
            duration_secs: Some(1420.0),
            video: Some(VideoTrack {
                index: 0,
                codec: "h264".to_string(),
                width: 1280,
                height: 720,
                frame_rate: Some(23.976),
            }),
            audio: vec![
                AudioTrack {
                    index: 1,
                    codec: "aac".to_string(),
                    language: "jpn".to_string(),
                    title: "Japanese".to_string(),
                    channels: Some(2),
                    default: false,
                },
                AudioTrack {
                    index: 2,
                    codec: "aac".to_string(),
                    language: "unknown".to_string(),
                    title: "Audio 2".to_string(),
                    channels: Some(2),
                    default: false,
                },
            ],
            subtitles: vec![SubtitleTrack {
                index: 3,
                codec: "ass".to_string(),
                language: "eng".to_string(),
                title: "English".to_string(),
                default: false,
                forced: false,
            }],
        }
    }

    fn packager() -> PlaylistPackager {
        PlaylistPackager::new(PackagingConfig::default())
    }

    #[test]
    fn test_select_rungs_skips_upscaling() {
        let ladder = PackagingConfig::default().ladder;

        let rungs = select_rungs(&ladder, Some(720));
        let names: Vec<&str> = rungs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["720p", "480p"]);

        let rungs = select_rungs(&ladder, Some(2160));
        assert_eq!(rungs.len(), 3);

        let rungs = select_rungs(&ladder, Some(360));
        assert!(rungs.is_empty());

        // Unknown source height keeps the full ladder.
        let rungs = select_rungs(&ladder, None);
        assert_eq!(rungs.len(), 3);
    }

    #[test]
    fn test_build_args_copy_for_compatible_codec() {
        let target = RenditionTarget {
            label: "source".to_string(),
            video_bitrate: "2000k".to_string(),
            audio_bitrate: "128k".to_string(),
            scale: None,
        };
        let args = packager().build_args(
            Path::new("/tmp/in.mp4"),
            Path::new("/tmp/out"),
            &target,
            &tracks_720p(),
        );

        let joined = args.join(" ");
        assert!(joined.contains("-map 0:v:0 -c:v copy"));
        assert!(joined.contains("-map 0:a:0 -c:a aac -b:a 128k -ac 2"));
        assert!(joined.contains("-sn"));
        assert!(joined.contains("-hls_time 6"));
        assert!(joined.contains("-hls_playlist_type vod"));
        assert!(joined.contains("-hls_flags independent_segments"));
        assert!(joined.contains("-start_number 0"));
        assert!(joined.contains("/tmp/out/segment_%03d.ts"));
        assert!(joined.ends_with("-y /tmp/out/stream.m3u8"));
    }

    #[test]
    fn test_build_args_reencodes_scaled_rungs() {
        let target = RenditionTarget {
            label: "480p".to_string(),
            video_bitrate: "1000k".to_string(),
            audio_bitrate: "96k".to_string(),
            scale: Some((854, 480)),
        };
        let args = packager().build_args(
            Path::new("/tmp/in.mp4"),
            Path::new("/tmp/out/480p"),
            &target,
            &tracks_720p(),
        );

        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 1000k"));
        assert!(joined.contains("scale='min(854,iw)':'min(480,ih)'"));
        assert!(!joined.contains("-c:v copy"));
    }

    #[test]
    fn test_build_args_reencodes_incompatible_codec() {
        let mut tracks = tracks_720p();
        tracks.video.as_mut().unwrap().codec = "hevc".to_string();

        let target = RenditionTarget {
            label: "source".to_string(),
            video_bitrate: "2000k".to_string(),
            audio_bitrate: "128k".to_string(),
            scale: None,
        };
        let args = packager().build_args(
            Path::new("/tmp/in.mkv"),
            Path::new("/tmp/out"),
            &target,
            &tracks,
        );

        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        // No resolution target on the single-rendition path.
        assert!(!joined.contains("scale="));
    }

    #[test]
    fn test_master_groups_single_default() {
        let master = packager().add_media_groups(MasterPlaylist::new(), &tracks_720p());
        assert_eq!(master.audio.len(), 2);
        assert_eq!(master.audio.iter().filter(|e| e.default).count(), 1);
        assert!(master.audio[0].default);
        assert_eq!(master.subtitles.len(), 1);
    }

    #[test]
    fn test_master_groups_honor_container_default_flag() {
        let mut tracks = tracks_720p();
        tracks.audio[1].default = true;

        let master = packager().add_media_groups(MasterPlaylist::new(), &tracks);
        assert!(!master.audio[0].default);
        assert!(master.audio[1].default);
    }

    #[test]
    fn test_subtitle_listing_is_independent_of_skip_policy() {
        // Default config drops subtitles from the transcode but the
        // master still advertises them.
        let packager = packager();
        assert!(packager.config.skip_subtitles);

        let master = packager.add_media_groups(MasterPlaylist::new(), &tracks_720p());
        assert_eq!(master.subtitles.len(), 1);
        assert_eq!(master.subtitles[0].uri, "subtitle_3.m3u8");

        let target = RenditionTarget {
            label: "source".to_string(),
            video_bitrate: "2000k".to_string(),
            audio_bitrate: "128k".to_string(),
            scale: None,
        };
        let args = packager.build_args(
            Path::new("/tmp/in.mp4"),
            Path::new("/tmp/out"),
            &target,
            &tracks_720p(),
        );
        assert!(args.contains(&"-sn".to_string()));
    }
}

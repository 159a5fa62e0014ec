//! End-to-end ingestion pipeline.
//!
//! Drives one stream id through download, inspection, and packaging,
//! recording lifecycle transitions in the job registry. Concurrent
//! requests for the same stream id share a single pipeline run.

use crate::config::Config;
use crate::download::{DownloadCoordinator, DownloadProgress};
use crate::error::Result;
use crate::hls::PlaylistPackager;
use crate::inflight::InFlight;
use crate::job::{JobRegistry, JobState, StreamJob};
use crate::probe::{TrackInfo, TrackInspector};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// How a source is packaged into playlists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackagingMode {
    /// One rendition at source resolution, with audio/subtitle groups.
    SingleRendition,
    /// The configured quality ladder under one master playlist.
    Adaptive,
}

/// Everything a caller needs once a stream is ready to serve.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub stream_id: String,
    pub master_playlist: PathBuf,
    pub tracks: TrackInfo,
    /// Quality labels of the packaged renditions.
    pub renditions: Vec<String>,
}

/// Orchestrates download, inspection, and packaging for stream jobs.
///
/// Cheap to clone; clones share the registry, the coordinator's
/// transfer map, and the whole-job de-duplication map.
#[derive(Clone)]
pub struct StreamPipeline {
    coordinator: DownloadCoordinator,
    inspector: TrackInspector,
    packager: PlaylistPackager,
    registry: JobRegistry,
    runs: InFlight<PipelineOutput>,
}

impl StreamPipeline {
    pub fn new(config: &Config, registry: JobRegistry) -> Result<Self> {
        let coordinator =
            DownloadCoordinator::new(&config.storage, config.download.clone(), registry.clone())?;

        Ok(Self {
            coordinator,
            inspector: TrackInspector::new(config.tracks.clone()),
            packager: PlaylistPackager::new(config.packaging.clone()),
            registry,
            runs: InFlight::new(),
        })
    }

    /// Run the full pipeline for one stream, or join the run already in
    /// progress for the same stream id.
    ///
    /// On success the job is `Ready` and the returned master playlist
    /// exists on disk. On failure the job is `Failed` with the error's
    /// kind and message as the reason.
    pub async fn process(
        &self,
        stream_id: &str,
        source_url: &str,
        mode: PackagingMode,
    ) -> Result<PipelineOutput> {
        self.registry.register(stream_id, source_url);

        let pipeline = self.clone();
        let id = stream_id.to_string();
        let url = source_url.to_string();

        self.runs
            .run(stream_id, async move {
                let result = pipeline.run_stages(&id, &url, mode).await;
                match &result {
                    Ok(output) => {
                        pipeline.registry.set_state(&id, JobState::Ready);
                        info!(
                            stream_id = %id,
                            playlist = %output.master_playlist.display(),
                            "Stream ready"
                        );
                    }
                    Err(e) => {
                        error!(stream_id = %id, stage = e.kind(), error = %e, "Pipeline failed");
                        pipeline
                            .registry
                            .set_state(&id, JobState::Failed(format!("{}: {}", e.kind(), e)));
                    }
                }
                result
            })
            .await
    }

    async fn run_stages(
        &self,
        stream_id: &str,
        source_url: &str,
        mode: PackagingMode,
    ) -> Result<PipelineOutput> {
        self.registry.set_state(stream_id, JobState::Downloading);
        let source = self.coordinator.acquire(source_url, stream_id).await?;

        self.registry.set_state(stream_id, JobState::Inspecting);
        let tracks = self.inspector.inspect(&source).await?;

        self.registry.set_state(stream_id, JobState::Packaging);
        let out_dir = self.coordinator.job_dir(stream_id);

        match mode {
            PackagingMode::SingleRendition => {
                let output = self
                    .packager
                    .package_single_rendition(&source, &out_dir, &tracks)
                    .await?;
                Ok(PipelineOutput {
                    stream_id: stream_id.to_string(),
                    master_playlist: output.master_playlist,
                    tracks: output.tracks,
                    renditions: vec!["source".to_string()],
                })
            }
            PackagingMode::Adaptive => {
                let output = self
                    .packager
                    .package_adaptive(&source, &out_dir, &tracks)
                    .await?;
                Ok(PipelineOutput {
                    stream_id: stream_id.to_string(),
                    master_playlist: output.master_playlist,
                    tracks,
                    renditions: output
                        .variants
                        .into_iter()
                        .map(|v| v.preset.name)
                        .collect(),
                })
            }
        }
    }

    /// Current job record for a stream id, if one exists.
    pub fn status(&self, stream_id: &str) -> Option<StreamJob> {
        self.registry.get(stream_id)
    }

    /// All known job records.
    pub fn jobs(&self) -> Vec<StreamJob> {
        self.registry.list()
    }

    /// On-disk download state for a stream id.
    pub async fn download_progress(&self, stream_id: &str) -> DownloadProgress {
        self.coordinator.download_progress(stream_id).await
    }

    /// Force-remove one job's storage and registry record.
    pub async fn cleanup_one(&self, stream_id: &str) -> Result<()> {
        self.coordinator.cleanup_one(stream_id).await
    }

    /// Sweep job directories older than `max_age`, skipping in-flight jobs.
    pub async fn cleanup_stale(&self, max_age: Duration) -> usize {
        self.coordinator.cleanup_stale(max_age).await
    }

    pub fn coordinator(&self) -> &DownloadCoordinator {
        &self.coordinator
    }
}

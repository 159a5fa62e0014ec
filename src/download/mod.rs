//! Source media download coordination.
//!
//! Fetches remote media files into per-job directories under the
//! storage root, with at-most-one concurrent transfer per stream id,
//! on-disk caching, and timed eviction of stale job directories.

use crate::config::{DownloadConfig, StorageConfig};
use crate::error::{Error, Result};
use crate::inflight::InFlight;
use crate::job::JobRegistry;
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// On-disk state of a job's source file, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadProgress {
    pub exists: bool,
    pub size: u64,
    pub path: Option<PathBuf>,
}

/// Downloads remote source files with per-stream-id de-duplication.
///
/// Cheap to clone; clones share the HTTP connection pool, the job
/// registry, and the in-flight transfer map.
#[derive(Clone)]
pub struct DownloadCoordinator {
    client: reqwest::Client,
    root: PathBuf,
    config: DownloadConfig,
    registry: JobRegistry,
    transfers: InFlight<PathBuf>,
}

impl DownloadCoordinator {
    /// Create a coordinator writing beneath `storage.root`.
    pub fn new(
        storage: &StorageConfig,
        config: DownloadConfig,
        registry: JobRegistry,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::download(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            root: storage.root.clone(),
            config,
            registry,
            transfers: InFlight::new(),
        })
    }

    /// Directory holding all artifacts for one stream id.
    pub fn job_dir(&self, stream_id: &str) -> PathBuf {
        self.root.join(stream_id)
    }

    /// Path the source file for `url` will occupy once downloaded.
    pub fn source_path(&self, stream_id: &str, url: &str) -> PathBuf {
        self.job_dir(stream_id)
            .join(format!("video.{}", extension_from_url(url)))
    }

    /// Fetch `url` into this job's directory, returning the local path.
    ///
    /// If a non-empty copy already exists on disk it is returned without
    /// any network I/O. A zero-byte leftover from an interrupted attempt
    /// is deleted and re-downloaded. Concurrent calls for the same
    /// stream id share a single transfer and outcome.
    pub async fn acquire(&self, url: &str, stream_id: &str) -> Result<PathBuf> {
        let target = self.source_path(stream_id, url);
        let client = self.client.clone();
        let config = self.config.clone();
        let registry = self.registry.clone();
        let url = url.to_string();
        let id = stream_id.to_string();

        self.transfers
            .run(stream_id, async move {
                fetch_to_disk(client, config, registry, &url, &id, target).await
            })
            .await
    }

    /// Report whether this job's source file exists and how large it is.
    pub async fn download_progress(&self, stream_id: &str) -> DownloadProgress {
        let dir = self.job_dir(stream_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => {
                return DownloadProgress {
                    exists: false,
                    size: 0,
                    path: None,
                }
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some("video") {
                let size = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                return DownloadProgress {
                    exists: true,
                    size,
                    path: Some(path),
                };
            }
        }

        DownloadProgress {
            exists: false,
            size: 0,
            path: None,
        }
    }

    /// Force-remove a job's directory tree, regardless of job state.
    pub async fn cleanup_one(&self, stream_id: &str) -> Result<()> {
        let dir = self.job_dir(stream_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(stream_id = %stream_id, "Removed job directory");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.registry.remove(stream_id);
        Ok(())
    }

    /// Remove job directories whose last-modified time exceeds `max_age`.
    ///
    /// Directories belonging to in-flight jobs are skipped regardless of
    /// apparent age. A failure on one directory is logged and does not
    /// abort the sweep. Returns the number of directories removed.
    pub async fn cleanup_stale(&self, max_age: Duration) -> usize {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Eviction sweep cannot read storage root");
                return 0;
            }
        };

        let now = std::time::SystemTime::now();
        let mut removed = 0usize;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(stream_id) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };

            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    warn!(stream_id = %stream_id, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !metadata.is_dir() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            if self.registry.is_in_flight(&stream_id) || self.transfers.contains(&stream_id) {
                debug!(stream_id = %stream_id, "Skipping in-flight job during sweep");
                continue;
            }

            match fs::remove_dir_all(&path).await {
                Ok(()) => {
                    info!(
                        stream_id = %stream_id,
                        age_secs = age.as_secs(),
                        "Evicted stale job directory"
                    );
                    self.registry.remove(&stream_id);
                    removed += 1;
                }
                Err(e) => {
                    warn!(stream_id = %stream_id, error = %e, "Failed to evict job directory");
                }
            }
        }

        if removed > 0 {
            info!(removed = removed, "Eviction sweep finished");
        }

        removed
    }
}

/// Stream the response body to disk, tracking progress in the registry.
///
/// The caller-facing cache and stale-empty checks run inside this
/// function so they are covered by the same in-flight de-duplication
/// as the transfer itself.
async fn fetch_to_disk(
    client: reqwest::Client,
    config: DownloadConfig,
    registry: JobRegistry,
    url: &str,
    stream_id: &str,
    target: PathBuf,
) -> Result<PathBuf> {
    match fs::metadata(&target).await {
        Ok(meta) if meta.len() > 0 => {
            info!(
                stream_id = %stream_id,
                size_mb = meta.len() / 1024 / 1024,
                "Source already on disk, skipping download"
            );
            return Ok(target);
        }
        Ok(_) => {
            warn!(stream_id = %stream_id, "Found zero-byte leftover, re-downloading");
            fs::remove_file(&target).await?;
        }
        Err(_) => {}
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    info!(stream_id = %stream_id, url = %url, "Starting download");

    let timeout = Duration::from_secs(config.timeout_secs);
    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| Error::download(format!("no response within {}s from {}", config.timeout_secs, url)))?
        .map_err(|e| Error::download(e.to_string()))?;

    let response = response
        .error_for_status()
        .map_err(|e| Error::download(e.to_string()))?;

    let total = response.content_length();
    registry.update_progress(stream_id, 0, total);

    let result = write_body(response, &target, &config, &registry, stream_id).await;

    match result {
        Ok(downloaded) => {
            // Let the file's metadata settle before consumers open it.
            tokio::time::sleep(Duration::from_millis(config.grace_delay_ms)).await;
            info!(
                stream_id = %stream_id,
                bytes = downloaded,
                "Download completed"
            );
            Ok(target)
        }
        Err(e) => {
            if let Err(cleanup_err) = fs::remove_file(&target).await {
                if cleanup_err.kind() != std::io::ErrorKind::NotFound {
                    warn!(stream_id = %stream_id, error = %cleanup_err, "Failed to remove partial file");
                }
            }
            Err(e)
        }
    }
}

async fn write_body(
    response: reqwest::Response,
    target: &Path,
    config: &DownloadConfig,
    registry: &JobRegistry,
    stream_id: &str,
) -> Result<u64> {
    let total = response.content_length();
    let file = fs::File::create(target).await?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();

    let mut downloaded = 0u64;
    let mut next_log = config.progress_log_bytes;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::download(e.to_string()))?;
        writer.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        registry.update_progress(stream_id, downloaded, None);

        if downloaded >= next_log {
            match total {
                Some(total) if total > 0 => debug!(
                    stream_id = %stream_id,
                    percent = format!("{:.1}", downloaded as f64 / total as f64 * 100.0),
                    "Download progress"
                ),
                _ => debug!(stream_id = %stream_id, bytes = downloaded, "Download progress"),
            }
            next_log += config.progress_log_bytes;
        }
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(downloaded)
}

/// File extension for the cached source, taken from the URL path.
fn extension_from_url(url: &str) -> &str {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or("");

    match path.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 4
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => "mp4",
    }
}

/// Spawn a background task that evicts stale job directories on a timer.
pub fn start_eviction_task(
    coordinator: DownloadCoordinator,
    storage: &StorageConfig,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(storage.sweep_interval_minutes * 60);
    let max_age = Duration::from_secs(storage.retention_minutes * 60);

    tokio::spawn(async move {
        // First pass runs one full interval in, not at startup.
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            coordinator.cleanup_stale(max_age).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_from_url() {
        assert_eq!(extension_from_url("https://host/f.mp4"), "mp4");
        assert_eq!(extension_from_url("https://host/a/b/episode.mkv"), "mkv");
        assert_eq!(extension_from_url("https://host/f.webm?token=x"), "webm");
        assert_eq!(extension_from_url("https://host/f.mp4#t=10"), "mp4");
    }

    #[test]
    fn test_extension_from_url_falls_back_to_mp4() {
        assert_eq!(extension_from_url("https://host/stream"), "mp4");
        assert_eq!(extension_from_url("https://host/"), "mp4");
        assert_eq!(extension_from_url("https://host/.hidden"), "mp4");
        // Too long or non-alphanumeric suffixes are not extensions.
        assert_eq!(extension_from_url("https://host/f.backup1"), "mp4");
        assert_eq!(extension_from_url("https://host/v1.2"), "2");
    }

    #[test]
    fn test_source_path_layout() {
        let registry = JobRegistry::new();
        let storage = StorageConfig {
            root: PathBuf::from("/data/streams"),
            ..Default::default()
        };
        let coordinator =
            DownloadCoordinator::new(&storage, DownloadConfig::default(), registry).unwrap();

        assert_eq!(
            coordinator.source_path("abc123", "https://host/f.mp4"),
            PathBuf::from("/data/streams/abc123/video.mp4")
        );
    }
}

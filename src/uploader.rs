//! Consumer side of the pipeline: polls the shared directory for finished
//! segments, uploads each one for indexing, then clears it out locally.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, info, warn};
use tokio::time::sleep;

use crate::client::{IndexerError, IndexingClient, UploadOptions};
use crate::models::UploadedVideo;

const SEGMENT_EXTENSION: &str = "ts";
const QUARANTINE_DIR: &str = "quarantine";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Warm-up before the first poll, in target durations, so the worker never
/// races the producer before any segment exists.
const WARMUP_TARGET_MULTIPLE: u32 = 4;

/// Destination for finished segments.
pub trait SegmentSink: Send + Sync + 'static {
    fn upload_segment(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<UploadedVideo, IndexerError>> + Send;
}

impl SegmentSink for IndexingClient {
    async fn upload_segment(&self, path: &Path) -> Result<UploadedVideo, IndexerError> {
        self.upload(path, &UploadOptions::default()).await
    }
}

/// Counters for a completed worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub failed: usize,
}

/// Polls the shared directory a fixed number of rounds, uploading every
/// recognized segment it finds. Coordination with the producer is purely
/// through directory listing.
pub struct UploadWorker<S: SegmentSink> {
    sink: S,
    segment_dir: PathBuf,
    rounds: u32,
    target: Duration,
}

impl<S: SegmentSink> UploadWorker<S> {
    pub fn new(sink: S, segment_dir: impl Into<PathBuf>, rounds: u32, target: Duration) -> Self {
        Self {
            sink,
            segment_dir: segment_dir.into(),
            rounds,
            target,
        }
    }

    pub async fn run(self) -> UploadSummary {
        let warmup = Duration::from_secs(1) + self.target * WARMUP_TARGET_MULTIPLE;
        info!(
            "waiting {}s for the first segment to be written",
            warmup.as_secs()
        );
        sleep(warmup).await;

        let mut summary = UploadSummary::default();
        for _ in 0..self.rounds {
            match self.list_segments().await {
                Ok(segments) => {
                    for path in segments {
                        self.handle_segment(&path, &mut summary).await;
                    }
                }
                Err(err) => {
                    error!(
                        "failed to list segment directory {}: {err}",
                        self.segment_dir.display()
                    );
                }
            }
            sleep(POLL_INTERVAL).await;
        }
        summary
    }

    async fn list_segments(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut segments = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.segment_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SEGMENT_EXTENSION) {
                segments.push(path);
            }
        }
        Ok(segments)
    }

    /// Uploads one segment and removes it from the shared directory either
    /// way: deleted on success, quarantined on failure so a failed upload is
    /// never silently lost.
    async fn handle_segment(&self, path: &Path, summary: &mut UploadSummary) {
        info!("uploading segment {}", path.display());
        match self.sink.upload_segment(path).await {
            Ok(video) => {
                info!("uploaded {} as video {}", path.display(), video.id);
                summary.uploaded += 1;
                if let Err(err) = tokio::fs::remove_file(path).await {
                    error!("failed to delete uploaded segment {}: {err}", path.display());
                }
            }
            Err(err) => {
                error!("failed to upload segment {}: {err}", path.display());
                summary.failed += 1;
                if let Err(err) = self.quarantine(path).await {
                    error!("failed to quarantine segment {}: {err}", path.display());
                }
            }
        }
    }

    async fn quarantine(&self, path: &Path) -> std::io::Result<()> {
        let quarantine_dir = self.segment_dir.join(QUARANTINE_DIR);
        tokio::fs::create_dir_all(&quarantine_dir).await?;
        let Some(file_name) = path.file_name() else {
            return Ok(());
        };
        let dest = quarantine_dir.join(file_name);
        warn!("moving failed segment to {}", dest.display());
        tokio::fs::rename(path, dest).await
    }
}

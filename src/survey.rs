//! Paginated survey of the indexed-video corpus, collecting a bounded sample
//! of unresolved ("Unknown") face detections and their thumbnails.
//!
//! The survey is resumable: each processed video leaves a `{video_id}.json`
//! marker in the working directory, and already-downloaded `{thumbnail}.jpg`
//! files seed the accumulator on the next run.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::client::{IndexerError, IndexingClient};
use crate::models::{Face, VideoIndex, VideoListPage};

/// The subset of indexing operations the surveyor depends on.
pub trait VideoIndexing: Send + Sync {
    fn list_page(&self, skip: Option<usize>)
    -> impl Future<Output = Option<VideoListPage>> + Send;
    fn get_index(&self, video_id: &str) -> impl Future<Output = Option<VideoIndex>> + Send;
    fn fetch_thumbnail(
        &self,
        video_id: &str,
        thumbnail_id: &str,
    ) -> impl Future<Output = Result<Vec<u8>, IndexerError>> + Send;
    fn renew_credentials(&self) -> impl Future<Output = Result<(), IndexerError>> + Send;
}

impl VideoIndexing for IndexingClient {
    async fn list_page(&self, skip: Option<usize>) -> Option<VideoListPage> {
        IndexingClient::list_page(self, skip).await
    }

    async fn get_index(&self, video_id: &str) -> Option<VideoIndex> {
        IndexingClient::get_index(self, video_id).await
    }

    async fn fetch_thumbnail(
        &self,
        video_id: &str,
        thumbnail_id: &str,
    ) -> Result<Vec<u8>, IndexerError> {
        IndexingClient::fetch_thumbnail(self, video_id, thumbnail_id).await
    }

    async fn renew_credentials(&self) -> Result<(), IndexerError> {
        IndexingClient::renew_credentials(self).await
    }
}

/// Per-video face partition, persisted as the processed marker.
///
/// A face whose name contains `"Unknown"` is unknown; otherwise a face
/// carrying a resolved person id is known; a face with neither lands in the
/// ignored bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceImpressions {
    pub video_id: String,
    pub all_thumbnail_ids: Vec<String>,
    pub unknown_face_thumbnail_ids: Vec<String>,
    pub known_face_thumbnail_ids: Vec<String>,
    pub known_person_ids: Vec<String>,
    pub ignored_thumbnail_ids: Vec<String>,
}

impl FaceImpressions {
    pub fn partition(video_id: &str, faces: &[Face]) -> Self {
        let mut impressions = Self {
            video_id: video_id.to_string(),
            ..Self::default()
        };
        for face in faces {
            impressions.all_thumbnail_ids.push(face.thumbnail_id.clone());
            if face.name.contains("Unknown") {
                impressions
                    .unknown_face_thumbnail_ids
                    .push(face.thumbnail_id.clone());
            } else if let Some(person_id) = &face.known_person_id {
                impressions.known_person_ids.push(person_id.clone());
                impressions
                    .known_face_thumbnail_ids
                    .push(face.thumbnail_id.clone());
            } else {
                impressions
                    .ignored_thumbnail_ids
                    .push(face.thumbnail_id.clone());
            }
        }
        impressions
    }
}

/// Result of one thumbnail batch download.
#[derive(Debug, Default)]
pub struct ThumbnailBatch {
    pub saved: Vec<String>,
    pub failed: Vec<String>,
}

/// Downloads each thumbnail into `{dir}/{thumbnail_id}.jpg`. A failed fetch
/// renews credentials and retries exactly once; a second failure is recorded
/// per-id and the batch continues — nothing is raised.
pub async fn download_thumbnails<C: VideoIndexing>(
    catalog: &C,
    video_id: &str,
    thumbnail_ids: &[String],
    dir: &Path,
) -> ThumbnailBatch {
    let mut batch = ThumbnailBatch::default();
    for thumbnail_id in thumbnail_ids {
        let dest = dir.join(format!("{thumbnail_id}.jpg"));
        if dest.exists() {
            debug!("thumbnail {thumbnail_id} already downloaded");
            continue;
        }

        let bytes = match catalog.fetch_thumbnail(video_id, thumbnail_id).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!("thumbnail {thumbnail_id} failed ({err}); renewing credentials and retrying");
                if let Err(err) = catalog.renew_credentials().await {
                    warn!("credential renewal failed: {err}");
                }
                match catalog.fetch_thumbnail(video_id, thumbnail_id).await {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        error!(
                            "failed to download thumbnail {thumbnail_id} for video {video_id}: {err}"
                        );
                        None
                    }
                }
            }
        };

        match bytes {
            Some(bytes) => match tokio::fs::write(&dest, &bytes).await {
                Ok(()) => batch.saved.push(thumbnail_id.clone()),
                Err(err) => {
                    error!("failed to save thumbnail {}: {err}", dest.display());
                    batch.failed.push(thumbnail_id.clone());
                }
            },
            None => batch.failed.push(thumbnail_id.clone()),
        }
    }
    batch
}

/// Outcome of a survey run. An under-target finish is a reported state, not
/// an error.
#[derive(Debug, Default)]
pub struct SurveyReport {
    pub unknown_ids: Vec<String>,
    pub failed_thumbnails: Vec<String>,
    pub reached_target: bool,
}

/// Walks video pages accumulating unknown-face thumbnails until the target
/// is reached or the catalog runs out of pages.
pub struct FaceSurveyor<C: VideoIndexing> {
    catalog: C,
    working_dir: PathBuf,
    target: usize,
    page_size: usize,
    throttle: Duration,
}

impl<C: VideoIndexing> FaceSurveyor<C> {
    pub fn new(
        catalog: C,
        working_dir: impl Into<PathBuf>,
        target: usize,
        page_size: usize,
        throttle: Duration,
    ) -> Self {
        Self {
            catalog,
            working_dir: working_dir.into(),
            target,
            page_size,
            throttle,
        }
    }

    pub async fn run(&self) -> std::io::Result<SurveyReport> {
        let mut report = SurveyReport::default();
        self.seed_from_existing(&mut report)?;
        if report.unknown_ids.len() >= self.target {
            info!(
                "target of {} already satisfied by {} existing thumbnails",
                self.target,
                report.unknown_ids.len()
            );
            report.reached_target = true;
            return Ok(report);
        }

        let mut skip = None;
        'pages: loop {
            let Some(page) = self.catalog.list_page(skip).await else {
                warn!("could not fetch the next video page; stopping the survey");
                break;
            };

            for video in &page.results {
                let marker = self.working_dir.join(format!("{}.json", video.id));
                if marker.exists() {
                    continue;
                }
                if !self.throttle.is_zero() {
                    sleep(self.throttle).await;
                }

                let Some(index) = self.fetch_index_with_renewal(&video.id).await else {
                    // Not marked processed: eligible for retry on a later run.
                    warn!("skipping video {} after failed index fetch", video.id);
                    continue;
                };
                let Some(faces) = index.faces() else {
                    continue;
                };

                let impressions = FaceImpressions::partition(&video.id, faces);
                self.persist_marker(&marker, &impressions).await;

                let batch = download_thumbnails(
                    &self.catalog,
                    &video.id,
                    &impressions.unknown_face_thumbnail_ids,
                    &self.working_dir,
                )
                .await;
                report.unknown_ids.extend(batch.saved);
                report.failed_thumbnails.extend(batch.failed);

                if report.unknown_ids.len() >= self.target {
                    break 'pages;
                }
            }

            if !page.has_more() {
                info!(
                    "no further pages; survey ends with {} of {} unknown faces",
                    report.unknown_ids.len(),
                    self.target
                );
                break;
            }
            skip = Some(skip.unwrap_or(0) + self.page_size);
        }

        report.reached_target = report.unknown_ids.len() >= self.target;
        Ok(report)
    }

    /// Previously downloaded thumbnails count toward the target.
    fn seed_from_existing(&self, report: &mut SurveyReport) -> std::io::Result<()> {
        for entry in std::fs::read_dir(&self.working_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jpg")
                && let Some(stem) = path.file_stem()
            {
                report.unknown_ids.push(stem.to_string_lossy().into_owned());
            }
        }
        Ok(())
    }

    /// One fetch, then exactly one renew-and-retry on failure.
    async fn fetch_index_with_renewal(&self, video_id: &str) -> Option<VideoIndex> {
        if let Some(index) = self.catalog.get_index(video_id).await {
            return Some(index);
        }
        if let Err(err) = self.catalog.renew_credentials().await {
            warn!("credential renewal failed: {err}");
        }
        self.catalog.get_index(video_id).await
    }

    /// Writing the marker is what makes the video idempotent on resume. A
    /// write failure is logged, leaving the video eligible for reprocessing.
    async fn persist_marker(&self, marker: &Path, impressions: &FaceImpressions) {
        if marker.exists() {
            return;
        }
        match serde_json::to_string_pretty(impressions) {
            Ok(json) => {
                if let Err(err) = tokio::fs::write(marker, json).await {
                    error!("failed to write marker {}: {err}", marker.display());
                }
            }
            Err(err) => error!("failed to serialize marker {}: {err}", marker.display()),
        }
    }
}

/// Collects every page of the catalog, advancing the offset one block at a
/// time until the service declares the listing done.
pub async fn list_all_indexed<C: VideoIndexing>(catalog: &C, page_size: usize) -> Vec<VideoListPage> {
    let mut pages = Vec::new();
    let mut skip = None;
    while let Some(page) = catalog.list_page(skip).await {
        let has_more = page.has_more();
        pages.push(page);
        if !has_more {
            break;
        }
        skip = Some(skip.unwrap_or(0) + page_size);
    }
    pages
}

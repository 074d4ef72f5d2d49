//! Top-level wiring: the segment producer and the upload consumer run as two
//! independent long-running tasks, synchronized only through the shared
//! directory, and are joined at the end with each side's failure collected
//! separately.

use std::fmt;
use std::path::PathBuf;

use log::{error, info};

use crate::client::IndexingClient;
use crate::config::{Config, ConfigError};
use crate::segmenter::{Capture, SegmentOrchestrator, StreamlinkCapture};
use crate::uploader::{SegmentSink, UploadSummary, UploadWorker};

#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Io(std::io::Error),
    WorkingDirNotEmpty(PathBuf),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Config(err) => write!(f, "{err}"),
            PipelineError::Io(err) => write!(f, "io error: {err}"),
            PipelineError::WorkingDirNotEmpty(dir) => {
                write!(
                    f,
                    "working directory {} is not empty; clear it and try again",
                    dir.display()
                )
            }
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ConfigError> for PipelineError {
    fn from(value: ConfigError) -> Self {
        PipelineError::Config(value)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(value: std::io::Error) -> Self {
        PipelineError::Io(value)
    }
}

/// Terminal state of both tasks after the join. One side failing never
/// cancels or masks the other.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub stream_error: Option<String>,
    pub uploads: Option<UploadSummary>,
    pub upload_error: Option<String>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.stream_error.is_none() && self.upload_error.is_none()
    }
}

/// Validates the working directory and runs the live capture pipeline with
/// the production capture tool and upload sink.
pub async fn run_live_capture(
    config: &Config,
    client: IndexingClient,
) -> Result<PipelineReport, PipelineError> {
    let working_dir = &config.main.working_dir;
    ensure_clean_working_dir(working_dir)?;

    let target = config.stream.target_duration()?;
    let capture = StreamlinkCapture::new(
        &config.stream.capture_tool,
        config.stream.url.as_str(),
        config.stream.duration.as_str(),
        config.stream.quality.as_str(),
    );
    let orchestrator =
        SegmentOrchestrator::new(capture, working_dir, config.stream.rounds, target);
    let worker = UploadWorker::new(client, working_dir, config.stream.rounds, target);

    Ok(run_pipeline(orchestrator, worker).await)
}

/// A leftover file in the shared directory means a previous run did not
/// drain; refuse to start rather than re-upload or clobber it.
fn ensure_clean_working_dir(working_dir: &std::path::Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(working_dir)?;
    if std::fs::read_dir(working_dir)?.next().is_some() {
        return Err(PipelineError::WorkingDirNotEmpty(working_dir.to_path_buf()));
    }
    Ok(())
}

/// Spawns producer and consumer, waits for both, and reports each task's
/// outcome independently.
pub async fn run_pipeline<C, S>(
    orchestrator: SegmentOrchestrator<C>,
    worker: UploadWorker<S>,
) -> PipelineReport
where
    C: Capture,
    S: SegmentSink,
{
    let producer = tokio::spawn(orchestrator.run());
    let consumer = tokio::spawn(worker.run());
    let (stream_result, upload_result) = tokio::join!(producer, consumer);

    let stream_error = match stream_result {
        Ok(Ok(())) => {
            info!("segment producer finished cleanly");
            None
        }
        Ok(Err(err)) => {
            error!("segment producer failed: {err}");
            Some(err.to_string())
        }
        Err(err) => {
            error!("segment producer panicked: {err}");
            Some(err.to_string())
        }
    };

    let (uploads, upload_error) = match upload_result {
        Ok(summary) => {
            info!(
                "upload worker finished: {} uploaded, {} failed",
                summary.uploaded, summary.failed
            );
            (Some(summary), None)
        }
        Err(err) => {
            error!("upload worker panicked: {err}");
            (None, Some(err.to_string()))
        }
    };

    PipelineReport {
        stream_error,
        uploads,
        upload_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::IndexerError;
    use crate::models::UploadedVideo;
    use crate::segmenter::StreamError;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    struct FileWritingCapture;

    impl Capture for FileWritingCapture {
        async fn run(&self, _slot: usize, output: &Path) -> Result<(), StreamError> {
            tokio::fs::write(output, b"segment bytes")
                .await
                .map_err(StreamError::Spawn)?;
            Ok(())
        }
    }

    struct RecordingSink {
        uploads: Mutex<Vec<String>>,
    }

    impl SegmentSink for &'static RecordingSink {
        async fn upload_segment(&self, path: &Path) -> Result<UploadedVideo, IndexerError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.uploads.lock().unwrap().push(name);
            Ok(UploadedVideo {
                id: "video-1".to_string(),
                name: None,
                state: Some("Uploaded".to_string()),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn produced_segments_flow_through_to_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let target = Duration::from_secs(2);
        let orchestrator = SegmentOrchestrator::new(FileWritingCapture, dir.path(), 2, target);

        let sink: &'static RecordingSink = Box::leak(Box::new(RecordingSink {
            uploads: Mutex::new(Vec::new()),
        }));
        // Enough polling rounds to outlast the producer's two rounds plus the
        // consumer's warm-up.
        let worker = UploadWorker::new(sink, dir.path(), 12, target);

        let report = run_pipeline(orchestrator, worker).await;

        assert!(report.succeeded());
        let uploads = sink.uploads.lock().unwrap();
        assert!(!uploads.is_empty());
        // Every uploaded segment was deleted from the shared directory.
        let leftover: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".ts"))
            .collect();
        assert!(leftover.is_empty());
    }

    #[test]
    fn refuses_a_dirty_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stale.ts"), b"old").unwrap();

        let result = ensure_clean_working_dir(dir.path());
        assert!(matches!(result, Err(PipelineError::WorkingDirNotEmpty(_))));
    }

    #[test]
    fn creates_a_missing_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("segments");

        ensure_clean_working_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}

//! Producer side of the pipeline: segments a continuous stream into
//! timestamped files by repeatedly invoking an external capture tool.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use log::{debug, error, info, warn};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};

/// Number of rotating capture slots; also the size of the concurrency pool,
/// so a would-be third concurrent capture blocks until a slot frees up.
pub const SLOT_COUNT: usize = 2;

const SEGMENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Fatal capture failure. Aborts the remaining rounds of the slot it
/// occurred on; the sibling slot and the consumer are unaffected.
#[derive(Debug)]
pub enum StreamError {
    Spawn(std::io::Error),
    Exit { code: Option<i32>, stderr: String },
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Spawn(err) => write!(f, "failed to launch capture tool: {err}"),
            StreamError::Exit { code: Some(code), stderr } => {
                write!(f, "capture tool exited with code {code}: {stderr}")
            }
            StreamError::Exit { code: None, stderr } => {
                write!(f, "capture tool terminated by signal: {stderr}")
            }
        }
    }
}

impl std::error::Error for StreamError {}

/// One invocation of the capture tool, writing a bounded-duration segment to
/// `output`. Exit code zero is the only success signal.
pub trait Capture: Send + Sync + 'static {
    fn run(
        &self,
        slot: usize,
        output: &Path,
    ) -> impl Future<Output = Result<(), StreamError>> + Send;
}

/// Shells out to streamlink (or a compatible tool) for a fixed duration.
#[derive(Debug, Clone)]
pub struct StreamlinkCapture {
    program: PathBuf,
    stream_url: String,
    duration: String,
    quality: String,
}

impl StreamlinkCapture {
    pub fn new(
        program: impl Into<PathBuf>,
        stream_url: impl Into<String>,
        duration: impl Into<String>,
        quality: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            stream_url: stream_url.into(),
            duration: duration.into(),
            quality: quality.into(),
        }
    }
}

impl Capture for StreamlinkCapture {
    async fn run(&self, slot: usize, output: &Path) -> Result<(), StreamError> {
        debug!(
            "slot {slot}: {} --hls-duration {} {} {} -o {}",
            self.program.display(),
            self.duration,
            self.stream_url,
            self.quality,
            output.display()
        );

        let result = Command::new(&self.program)
            .arg("--hls-duration")
            .arg(&self.duration)
            .arg(&self.stream_url)
            .arg(&self.quality)
            .arg("-o")
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(StreamError::Spawn)?;

        if !result.status.success() {
            return Err(StreamError::Exit {
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Runs a fixed number of capture rounds, rotating across two slots by round
/// parity and pacing output to one segment per slot per target duration.
pub struct SegmentOrchestrator<C: Capture> {
    capture: Arc<C>,
    output_dir: PathBuf,
    rounds: u32,
    target: Duration,
    permits: Arc<Semaphore>,
}

impl<C: Capture> SegmentOrchestrator<C> {
    pub fn new(capture: C, output_dir: impl Into<PathBuf>, rounds: u32, target: Duration) -> Self {
        Self {
            capture: Arc::new(capture),
            output_dir: output_dir.into(),
            rounds,
            target,
            permits: Arc::new(Semaphore::new(SLOT_COUNT)),
        }
    }

    /// Runs all rounds to completion. Returns the first fatal slot error, if
    /// any, after every in-flight capture has finished.
    pub async fn run(self) -> Result<(), StreamError> {
        let slot_failed: Arc<[AtomicBool; SLOT_COUNT]> =
            Arc::new([AtomicBool::new(false), AtomicBool::new(false)]);
        let errors: Arc<Mutex<Vec<StreamError>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(self.rounds as usize);

        for round in 0..self.rounds {
            let slot = round as usize % SLOT_COUNT;
            if slot_failed[slot].load(Ordering::SeqCst) {
                warn!("slot {slot} aborted; skipping round {}", round + 1);
                continue;
            }

            let round_started = Instant::now();
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .expect("capture pool closed");

            let file_name = format!("{}.ts", Local::now().format(SEGMENT_TIMESTAMP_FORMAT));
            let output = self.output_dir.join(file_name);
            info!(
                "round {}/{}: capturing on slot {slot} -> {}",
                round + 1,
                self.rounds,
                output.display()
            );

            let capture = Arc::clone(&self.capture);
            let failed = Arc::clone(&slot_failed);
            let errors = Arc::clone(&errors);
            handles.push(tokio::spawn(async move {
                let staging = staging_path(&output);
                let result = capture.run(slot, &staging).await;
                drop(permit);
                match result {
                    Ok(()) => {
                        // Publish atomically so the consumer only ever sees
                        // fully written segments.
                        if let Err(err) = tokio::fs::rename(&staging, &output).await {
                            error!("failed to publish segment {}: {err}", output.display());
                        }
                    }
                    Err(err) => {
                        error!("capture on slot {slot} failed: {err}");
                        failed[slot].store(true, Ordering::SeqCst);
                        errors.lock().expect("error list poisoned").push(err);
                    }
                }
            }));

            let elapsed = round_started.elapsed();
            if elapsed < self.target {
                sleep(self.target - elapsed).await;
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        let mut errors = errors.lock().expect("error list poisoned");
        match errors.drain(..).next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn staging_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone)]
    struct GatedCapture {
        inner: Arc<GateInner>,
    }

    struct GateInner {
        active: AtomicUsize,
        max_active: AtomicUsize,
        started: AtomicUsize,
        gate: Semaphore,
    }

    impl GatedCapture {
        fn new() -> Self {
            Self {
                inner: Arc::new(GateInner {
                    active: AtomicUsize::new(0),
                    max_active: AtomicUsize::new(0),
                    started: AtomicUsize::new(0),
                    gate: Semaphore::new(0),
                }),
            }
        }

        fn started(&self) -> usize {
            self.inner.started.load(Ordering::SeqCst)
        }

        fn max_active(&self) -> usize {
            self.inner.max_active.load(Ordering::SeqCst)
        }

        fn release(&self, n: usize) {
            self.inner.gate.add_permits(n);
        }
    }

    impl Capture for GatedCapture {
        async fn run(&self, _slot: usize, _output: &Path) -> Result<(), StreamError> {
            self.inner.started.fetch_add(1, Ordering::SeqCst);
            let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.max_active.fetch_max(active, Ordering::SeqCst);

            let permit = self.inner.gate.acquire().await.unwrap();
            permit.forget();

            self.inner.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone)]
    struct RecordingCapture {
        epoch: Instant,
        cost: Duration,
        starts: Arc<Mutex<Vec<Duration>>>,
    }

    impl RecordingCapture {
        fn new(cost: Duration) -> Self {
            Self {
                epoch: Instant::now(),
                cost,
                starts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn starts(&self) -> Vec<Duration> {
            self.starts.lock().unwrap().clone()
        }
    }

    impl Capture for RecordingCapture {
        async fn run(&self, _slot: usize, _output: &Path) -> Result<(), StreamError> {
            self.starts.lock().unwrap().push(self.epoch.elapsed());
            sleep(self.cost).await;
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FlakyCapture {
        failing_slot: usize,
        calls: Arc<[AtomicUsize; SLOT_COUNT]>,
    }

    impl FlakyCapture {
        fn failing_slot(failing_slot: usize) -> Self {
            Self {
                failing_slot,
                calls: Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]),
            }
        }

        fn calls(&self, slot: usize) -> usize {
            self.calls[slot].load(Ordering::SeqCst)
        }
    }

    impl Capture for FlakyCapture {
        async fn run(&self, slot: usize, _output: &Path) -> Result<(), StreamError> {
            self.calls[slot].fetch_add(1, Ordering::SeqCst);
            if slot == self.failing_slot {
                return Err(StreamError::Exit {
                    code: Some(1),
                    stderr: "stream dropped".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Clone)]
    struct WritingCapture;

    impl Capture for WritingCapture {
        async fn run(&self, _slot: usize, output: &Path) -> Result<(), StreamError> {
            tokio::fs::write(output, b"segment bytes")
                .await
                .map_err(StreamError::Spawn)?;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn third_capture_stalls_until_a_slot_frees() {
        let capture = GatedCapture::new();
        let probe = capture.clone();
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = SegmentOrchestrator::new(capture, dir.path(), 3, Duration::ZERO);
        let run = tokio::spawn(orchestrator.run());

        sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.started(), 2);

        probe.release(1);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.started(), 3);

        probe.release(2);
        run.await.unwrap().unwrap();
        assert!(probe.max_active() <= SLOT_COUNT);
    }

    #[tokio::test(start_paused = true)]
    async fn rounds_are_paced_to_the_target_duration() {
        let target = Duration::from_secs(5);
        let capture = RecordingCapture::new(Duration::from_secs(2));
        let probe = capture.clone();
        let dir = tempfile::tempdir().unwrap();

        SegmentOrchestrator::new(capture, dir.path(), 3, target)
            .run()
            .await
            .unwrap();

        // Capture cost is under the target, so each round sleeps the
        // remainder and consecutive rounds start exactly one target apart.
        let starts = probe.starts();
        assert_eq!(starts, vec![Duration::ZERO, target, target * 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_slot_aborts_only_its_own_rounds() {
        let capture = FlakyCapture::failing_slot(0);
        let probe = capture.clone();
        let dir = tempfile::tempdir().unwrap();

        let result = SegmentOrchestrator::new(capture, dir.path(), 4, Duration::from_secs(5))
            .run()
            .await;

        assert!(matches!(result, Err(StreamError::Exit { .. })));
        // Slot 0 fails on its first round and never runs again; slot 1 keeps
        // both of its rounds.
        assert_eq!(probe.calls(0), 1);
        assert_eq!(probe.calls(1), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn segments_are_published_without_staging_suffix() {
        let dir = tempfile::tempdir().unwrap();

        SegmentOrchestrator::new(WritingCapture, dir.path(), 1, Duration::ZERO)
            .run()
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".ts"));
        assert!(!names[0].ends_with(".part"));
    }
}

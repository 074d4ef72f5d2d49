use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{info, warn};

use vistream::client::{self, IndexingClient};
use vistream::config::Config;
use vistream::credentials::CredentialManager;
use vistream::pipeline;
use vistream::survey::{self, FaceSurveyor};

const PROMPT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const PROMPT_MAX_POLLS: u32 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    vistream::logging::init();

    let mut args = env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "stream".to_string());
    let config_path = env::var("VISTREAM_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config =
        Config::load(Path::new(&config_path)).with_context(|| format!("loading {config_path}"))?;

    let http = reqwest::Client::new();
    let credentials = CredentialManager::connect(http, config.vi.clone())
        .await
        .context("acquiring access tokens")?;
    let client = IndexingClient::new(&config.vi, credentials).context("building indexing client")?;

    match mode.as_str() {
        "stream" => {
            let report = pipeline::run_live_capture(&config, client).await?;
            if let Some(err) = &report.stream_error {
                warn!("capture side ended with an error: {err}");
            }
            if let Some(err) = &report.upload_error {
                warn!("upload side ended with an error: {err}");
            }
            if let Some(uploads) = &report.uploads {
                info!(
                    "pipeline complete: {} segments uploaded, {} failed",
                    uploads.uploaded, uploads.failed
                );
            }
        }
        "survey" => {
            std::fs::create_dir_all(&config.main.working_dir)?;
            let surveyor = FaceSurveyor::new(
                client,
                &config.main.working_dir,
                config.survey.target_unknown_faces,
                config.survey.page_size,
                Duration::from_secs(config.survey.throttle_secs),
            );
            let report = surveyor.run().await.context("running face survey")?;
            info!(
                "survey complete: {} unknown face thumbnails collected (target {}), {} download failures, target reached: {}",
                report.unknown_ids.len(),
                config.survey.target_unknown_faces,
                report.failed_thumbnails.len(),
                report.reached_target
            );
        }
        "prompt" => {
            let video_id = args.next().context("usage: vistream prompt <video-id>")?;
            let content = client::await_prompt_content(
                &client,
                &video_id,
                PROMPT_POLL_INTERVAL,
                PROMPT_MAX_POLLS,
            )
            .await?;
            match content {
                Some(content) => {
                    for section in &content.sections {
                        println!(
                            "[{} - {}] {}",
                            section.start.as_deref().unwrap_or("?"),
                            section.end.as_deref().unwrap_or("?"),
                            section.content
                        );
                    }
                }
                None => warn!("prompt content for video {video_id} did not become ready in time"),
            }
        }
        "keyframes" => {
            std::fs::create_dir_all(&config.main.working_dir)?;
            let pages = survey::list_all_indexed(&client, config.survey.page_size).await;
            let mut downloaded = 0usize;
            let mut failed = Vec::new();
            for page in &pages {
                for video in &page.results {
                    match client
                        .download_artifact(&video.id, "KeyframesThumbnails", &config.main.working_dir)
                        .await
                    {
                        Ok(path) => {
                            info!("downloaded keyframes for video {} to {}", video.id, path.display());
                            downloaded += 1;
                        }
                        Err(err) => {
                            warn!("failed to download keyframes for video {}: {err}", video.id);
                            failed.push(video.id.clone());
                        }
                    }
                }
            }
            info!(
                "keyframes done: {downloaded} downloaded, {} failed",
                failed.len()
            );
        }
        other => bail!("unknown mode {other:?}; expected stream, survey, prompt or keyframes"),
    }

    Ok(())
}

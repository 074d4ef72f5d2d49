//! Typed client for the indexing service's resource endpoints.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use reqwest::{Client, Response, StatusCode, multipart};
use serde::de::DeserializeOwned;
use tokio::time::sleep;

use crate::config::IndexerConfig;
use crate::credentials::{AuthError, CredentialManager};
use crate::models::{PromptContent, UploadedVideo, VideoIndex, VideoListPage};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from indexing-service calls.
#[derive(Debug)]
pub enum IndexerError {
    Http(reqwest::Error),
    UnexpectedStatus { status: StatusCode, body: String },
    Parse(serde_json::Error),
    Auth(AuthError),
    Io(std::io::Error),
}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexerError::Http(err) => write!(f, "http error: {err}"),
            IndexerError::UnexpectedStatus { status, body } => {
                write!(f, "unexpected status {status}: {body}")
            }
            IndexerError::Parse(err) => write!(f, "malformed response: {err}"),
            IndexerError::Auth(err) => write!(f, "{err}"),
            IndexerError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for IndexerError {}

impl From<reqwest::Error> for IndexerError {
    fn from(value: reqwest::Error) -> Self {
        IndexerError::Http(value)
    }
}

impl From<AuthError> for IndexerError {
    fn from(value: AuthError) -> Self {
        IndexerError::Auth(value)
    }
}

impl From<std::io::Error> for IndexerError {
    fn from(value: std::io::Error) -> Self {
        IndexerError::Io(value)
    }
}

/// Upload knobs forwarded to the service as query parameters.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub privacy: String,
    pub priority: String,
    pub language: String,
    pub indexing_preset: String,
    pub streaming_preset: String,
    pub send_success_email: bool,
    pub use_managed_identity_to_download_video: bool,
    pub prevent_duplicates: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            privacy: "Private".to_string(),
            priority: "Low".to_string(),
            language: "auto".to_string(),
            indexing_preset: "Default".to_string(),
            streaming_preset: "Default".to_string(),
            send_success_email: false,
            use_managed_identity_to_download_video: false,
            prevent_duplicates: false,
        }
    }
}

impl UploadOptions {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("privacy", self.privacy.clone()),
            ("priority", self.priority.clone()),
            ("language", self.language.clone()),
            ("indexingPreset", self.indexing_preset.clone()),
            ("streamingPreset", self.streaming_preset.clone()),
            ("sendSuccessEmail", self.send_success_email.to_string()),
            (
                "useManagedIdentityToDownloadVideo",
                self.use_managed_identity_to_download_video.to_string(),
            ),
            ("preventDuplicates", self.prevent_duplicates.to_string()),
        ]
    }
}

/// Prompt-content lifecycle as seen by a polling caller.
#[derive(Debug)]
pub enum PromptStatus {
    Pending,
    Ready(PromptContent),
}

/// Client for one indexing account. Cheap to clone; the credential manager
/// is shared so a renewal is visible to every clone.
#[derive(Clone)]
pub struct IndexingClient {
    http: Client,
    credentials: Arc<CredentialManager>,
    location: String,
    account_id: String,
    subscription_key: String,
}

impl IndexingClient {
    pub fn new(
        settings: &IndexerConfig,
        credentials: Arc<CredentialManager>,
    ) -> Result<Self, IndexerError> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            credentials,
            location: settings.location.clone(),
            account_id: settings.account_id.clone(),
            subscription_key: settings.subscription_key.clone(),
        })
    }

    fn account_url(&self, suffix: &str) -> String {
        format!(
            "https://api.videoindexer.ai/{}/Accounts/{}{}",
            self.location, self.account_id, suffix
        )
    }

    async fn service_token(&self) -> String {
        self.credentials.current().await.service_token
    }

    /// Re-acquires both tokens. Used by retry policies that infer an expired
    /// token from a failed call.
    pub async fn renew_credentials(&self) -> Result<(), IndexerError> {
        self.credentials.renew().await?;
        Ok(())
    }

    /// Fetches one page of the video listing. Transport and status failures
    /// are logged and reported as `None`; this layer never retries.
    pub async fn list_page(&self, skip: Option<usize>) -> Option<VideoListPage> {
        match self.try_list_page(skip).await {
            Ok(page) => Some(page),
            Err(err) => {
                warn!("failed to list videos (skip {skip:?}): {err}");
                None
            }
        }
    }

    async fn try_list_page(&self, skip: Option<usize>) -> Result<VideoListPage, IndexerError> {
        let mut request = self
            .http
            .get(self.account_url("/Videos"))
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .query(&[("accessToken", self.service_token().await)]);
        if let Some(skip) = skip {
            request = request.query(&[("skip", skip.to_string())]);
        }
        parse_json(request.send().await?).await
    }

    /// Fetches the full index for a video, or `None` on any failure (logged).
    /// The caller owns the decision to renew credentials and retry.
    pub async fn get_index(&self, video_id: &str) -> Option<VideoIndex> {
        match self.try_get_index(video_id).await {
            Ok(index) => Some(index),
            Err(err) => {
                warn!("failed to fetch index for video {video_id}: {err}");
                None
            }
        }
    }

    async fn try_get_index(&self, video_id: &str) -> Result<VideoIndex, IndexerError> {
        let url = self.account_url(&format!("/Videos/{video_id}/Index"));
        let response = self
            .http
            .get(url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .query(&[("accessToken", self.service_token().await)])
            .send()
            .await?;
        parse_json(response).await
    }

    /// Uploads a local media file for indexing.
    pub async fn upload(
        &self,
        path: &Path,
        options: &UploadOptions,
    ) -> Result<UploadedVideo, IndexerError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = tokio::fs::read(path).await?;

        let part = multipart::Part::bytes(data).file_name(name.clone());
        let form = multipart::Form::new().part("file", part);

        let mut query = options.query_pairs();
        query.push(("name", name));
        query.push(("accessToken", self.service_token().await));

        let response = self
            .http
            .post(self.account_url("/Videos"))
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .query(&query)
            .multipart(form)
            .send()
            .await?;
        parse_json(response).await
    }

    /// Resolves the signed download URL for a video artifact.
    pub async fn get_artifact_url(
        &self,
        video_id: &str,
        artifact_type: &str,
    ) -> Result<String, IndexerError> {
        let url = self.account_url(&format!("/Videos/{video_id}/ArtifactUrl"));
        let token = self.service_token().await;
        let response = self
            .http
            .get(url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .query(&[("type", artifact_type), ("accessToken", token.as_str())])
            .send()
            .await?;
        parse_json(response).await
    }

    /// Downloads an artifact archive into `dest_dir` as `{video_id}.zip`.
    pub async fn download_artifact(
        &self,
        video_id: &str,
        artifact_type: &str,
        dest_dir: &Path,
    ) -> Result<std::path::PathBuf, IndexerError> {
        let signed_url = self.get_artifact_url(video_id, artifact_type).await?;
        let response = self.http.get(signed_url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexerError::UnexpectedStatus { status, body });
        }

        let bytes = response.bytes().await?;
        let path = dest_dir.join(format!("{video_id}.zip"));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }

    /// Fetches one face thumbnail as raw image bytes.
    pub async fn fetch_thumbnail(
        &self,
        video_id: &str,
        thumbnail_id: &str,
    ) -> Result<Vec<u8>, IndexerError> {
        let url = self.account_url(&format!("/Videos/{video_id}/Thumbnails/{thumbnail_id}"));
        let response = self
            .http
            .get(url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .query(&[("accessToken", self.service_token().await)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexerError::UnexpectedStatus { status, body });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Requests prompt-content generation for a video. Fire and forget: the
    /// outcome is logged, never returned; readiness is observed by polling.
    pub async fn create_prompt(&self, video_id: &str) {
        let url = self.account_url(&format!("/Videos/{video_id}/PromptContent"));
        let request = self
            .http
            .post(url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .query(&[("accessToken", self.service_token().await)]);

        match request.send().await {
            Ok(response) => {
                info!(
                    "prompt content requested for video {video_id}: {}",
                    response.status()
                );
            }
            Err(err) => warn!("prompt content request for video {video_id} failed: {err}"),
        }
    }

    /// Polls the current prompt-content state. A non-200 means the content is
    /// still pending; the caller bounds how long it keeps asking.
    pub async fn get_prompt(&self, video_id: &str) -> Result<PromptStatus, IndexerError> {
        let url = self.account_url(&format!("/Videos/{video_id}/PromptContent"));
        let response = self
            .http
            .get(url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .query(&[("accessToken", self.service_token().await)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            info!("prompt content for video {video_id} not ready yet ({status})");
            return Ok(PromptStatus::Pending);
        }

        let body = response.text().await?;
        let content = serde_json::from_str(&body).map_err(IndexerError::Parse)?;
        Ok(PromptStatus::Ready(content))
    }
}

/// Drives the prompt-content state machine to readiness: request creation,
/// then poll at a fixed interval until ready or `max_polls` is exhausted.
/// `None` means the content never became ready within the bound.
pub async fn await_prompt_content(
    client: &IndexingClient,
    video_id: &str,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<Option<PromptContent>, IndexerError> {
    client.create_prompt(video_id).await;
    for _ in 0..max_polls {
        sleep(poll_interval).await;
        if let PromptStatus::Ready(content) = client.get_prompt(video_id).await? {
            return Ok(Some(content));
        }
    }
    Ok(None)
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, IndexerError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(IndexerError::UnexpectedStatus { status, body });
    }
    serde_json::from_str(&body).map_err(IndexerError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_options_carry_the_documented_defaults() {
        let options = UploadOptions::default();
        assert_eq!(options.privacy, "Private");
        assert_eq!(options.priority, "Low");
        assert_eq!(options.language, "auto");
        assert_eq!(options.indexing_preset, "Default");
        assert_eq!(options.streaming_preset, "Default");
        assert!(!options.send_success_email);
        assert!(!options.use_managed_identity_to_download_video);
        assert!(!options.prevent_duplicates);
    }

    #[test]
    fn upload_options_serialize_booleans_lowercase() {
        let pairs = UploadOptions::default().query_pairs();
        let email = pairs.iter().find(|(k, _)| *k == "sendSuccessEmail").unwrap();
        assert_eq!(email.1, "false");
        let duplicates = pairs
            .iter()
            .find(|(k, _)| *k == "preventDuplicates")
            .unwrap();
        assert_eq!(duplicates.1, "false");
        assert_eq!(pairs.len(), 8);
    }
}

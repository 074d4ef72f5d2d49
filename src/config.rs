//! JSON configuration for the capture pipeline and the face survey.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    InvalidDuration(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read config: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse config: {err}"),
            ConfigError::InvalidDuration(text) => {
                write!(f, "invalid duration {text:?}, expected HH:MM:SS")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        ConfigError::Parse(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub main: MainConfig,
    pub stream: StreamConfig,
    pub vi: IndexerConfig,
    #[serde(default)]
    pub survey: SurveyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainConfig {
    /// Shared directory holding segments, markers and downloaded thumbnails.
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub url: String,
    /// Target segment duration as HH:MM:SS, passed through to the capture tool.
    pub duration: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_capture_tool")]
    pub capture_tool: PathBuf,
    pub rounds: u32,
}

impl StreamConfig {
    pub fn target_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.duration)
    }
}

/// Identifiers and credentials for the indexing service and its token chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerConfig {
    pub location: String,
    pub account_id: String,
    pub subscription_key: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    pub resource_group_name: String,
    pub account_name: String,
    pub api_version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyConfig {
    #[serde(default = "default_survey_target")]
    pub target_unknown_faces: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Pause between index fetches, to stay under service throttling limits.
    #[serde(default)]
    pub throttle_secs: u64,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            target_unknown_faces: default_survey_target(),
            page_size: default_page_size(),
            throttle_secs: 0,
        }
    }
}

fn default_quality() -> String {
    "360p".to_string()
}

fn default_capture_tool() -> PathBuf {
    PathBuf::from("streamlink")
}

fn default_survey_target() -> usize {
    100
}

fn default_page_size() -> usize {
    200
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

/// Parses an `HH:MM:SS` string into a duration.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        return Err(ConfigError::InvalidDuration(text.to_string()));
    }
    let mut total = 0u64;
    for part in parts {
        let value: u64 = part
            .parse()
            .map_err(|_| ConfigError::InvalidDuration(text.to_string()))?;
        total = total * 60 + value;
    }
    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_hms_durations() {
        assert_eq!(parse_duration("00:00:05").unwrap(), Duration::from_secs(5));
        assert_eq!(
            parse_duration("01:02:03").unwrap(),
            Duration::from_secs(3723)
        );
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(parse_duration("90").is_err());
        assert!(parse_duration("00:05").is_err());
        assert!(parse_duration("aa:bb:cc").is_err());
    }

    #[test]
    fn loads_config_with_defaults() {
        let json = r#"{
            "main": { "workingDir": "/tmp/segments" },
            "stream": { "url": "https://example.com/live", "duration": "00:00:05", "rounds": 10 },
            "vi": {
                "location": "trial",
                "accountId": "acc",
                "subscriptionKey": "key",
                "tenantId": "tenant",
                "clientId": "client",
                "clientSecret": "secret",
                "subscriptionId": "sub",
                "resourceGroupName": "rg",
                "accountName": "name",
                "apiVersion": "2024-01-01"
            }
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.main.working_dir, PathBuf::from("/tmp/segments"));
        assert_eq!(config.stream.quality, "360p");
        assert_eq!(config.stream.capture_tool, PathBuf::from("streamlink"));
        assert_eq!(config.survey.page_size, 200);
        assert_eq!(config.survey.target_unknown_faces, 100);
        assert_eq!(
            config.stream.target_duration().unwrap(),
            Duration::from_secs(5)
        );
    }
}

//! Credential lifecycle for the indexing service.
//!
//! Two chained tokens: a platform token from the tenant's OAuth2 endpoint,
//! then a service token minted from it. Renewal is reactive only — a caller
//! that observes an authorization failure asks for `renew()`; nothing here
//! runs on a timer or tracks expiry.

use std::fmt;
use std::sync::Arc;

use log::info;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::IndexerConfig;

const PLATFORM_SCOPE: &str = "https://management.azure.com/.default";

/// Errors raised during token exchange. Propagated to callers unmodified.
#[derive(Debug)]
pub enum AuthError {
    Http(reqwest::Error),
    UnexpectedStatus { status: StatusCode, body: String },
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Http(err) => write!(f, "token exchange failed: {err}"),
            AuthError::UnexpectedStatus { status, body } => {
                write!(f, "token exchange returned {status}: {body}")
            }
        }
    }
}

impl std::error::Error for AuthError {}

impl From<reqwest::Error> for AuthError {
    fn from(value: reqwest::Error) -> Self {
        AuthError::Http(value)
    }
}

/// The current platform/service token pair. Always replaced as a unit.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub platform_token: String,
    pub service_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenRequest {
    permission_type: &'static str,
    scope: &'static str,
}

impl AccessTokenRequest {
    fn account_contributor() -> Self {
        Self {
            permission_type: "Contributor",
            scope: "Account",
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlatformTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceTokenResponse {
    access_token: String,
}

/// Owns the shared token pair used by every network call.
///
/// Reads go through `current()` and never block renewal; `renew()` calls are
/// serialized by a guard mutex so overlapping failures trigger one exchange
/// at a time.
pub struct CredentialManager {
    http: Client,
    settings: IndexerConfig,
    tokens: RwLock<TokenPair>,
    renewal: Mutex<()>,
}

impl CredentialManager {
    /// Performs the initial acquire and returns a shareable manager.
    pub async fn connect(http: Client, settings: IndexerConfig) -> Result<Arc<Self>, AuthError> {
        let pair = exchange(&http, &settings).await?;
        Ok(Arc::new(Self {
            http,
            settings,
            tokens: RwLock::new(pair),
            renewal: Mutex::new(()),
        }))
    }

    /// Snapshot of the current token pair.
    pub async fn current(&self) -> TokenPair {
        self.tokens.read().await.clone()
    }

    /// Re-runs the full acquire and swaps in the new pair atomically.
    pub async fn renew(&self) -> Result<(), AuthError> {
        let _guard = self.renewal.lock().await;
        let pair = exchange(&self.http, &self.settings).await?;
        *self.tokens.write().await = pair;
        info!("renewed platform and service access tokens");
        Ok(())
    }
}

/// One platform exchange followed by one service exchange. Returns only once
/// both succeed; either failure propagates.
async fn exchange(http: &Client, settings: &IndexerConfig) -> Result<TokenPair, AuthError> {
    let platform_token = platform_token(http, settings).await?;
    let service_token = service_token(http, settings, &platform_token).await?;
    Ok(TokenPair {
        platform_token,
        service_token,
    })
}

async fn platform_token(http: &Client, settings: &IndexerConfig) -> Result<String, AuthError> {
    let url = format!(
        "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
        settings.tenant_id
    );
    let params = [
        ("client_id", settings.client_id.as_str()),
        ("client_secret", settings.client_secret.as_str()),
        ("scope", PLATFORM_SCOPE),
        ("grant_type", "client_credentials"),
    ];

    let response = http.post(url).form(&params).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::UnexpectedStatus { status, body });
    }

    let token: PlatformTokenResponse = response.json().await?;
    Ok(token.access_token)
}

async fn service_token(
    http: &Client,
    settings: &IndexerConfig,
    platform_token: &str,
) -> Result<String, AuthError> {
    let url = format!(
        "https://management.azure.com/subscriptions/{}/resourceGroups/{}/providers/Microsoft.VideoIndexer/accounts/{}/generateAccessToken?api-version={}",
        settings.subscription_id,
        settings.resource_group_name,
        settings.account_name,
        settings.api_version
    );

    let response = http
        .post(url)
        .header(AUTHORIZATION, format!("Bearer {platform_token}"))
        .json(&AccessTokenRequest::account_contributor())
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::UnexpectedStatus { status, body });
    }

    let token: ServiceTokenResponse = response.json().await?;
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_token_request_serializes_as_expected() {
        let body = serde_json::to_string(&AccessTokenRequest::account_contributor()).unwrap();
        assert_eq!(body, r#"{"permissionType":"Contributor","scope":"Account"}"#);
    }
}

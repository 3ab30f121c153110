//! Access-token sources for the Google APIs.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Tokens are refreshed this long before their reported expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => now + ChronoDuration::seconds(EXPIRY_SKEW_SECS) < at,
            None => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("reading token file {path}: {message}")]
    TokenFile { path: String, message: String },
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<AccessToken, CredentialError>;
}

/// A pre-issued token, used as-is.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(secret, None),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<AccessToken, CredentialError> {
        if self.token.secret().is_empty() {
            return Err(CredentialError::MissingCredentials("empty access token".into()));
        }
        Ok(self.token.clone())
    }
}

/// Exchanges a long-lived refresh token for short-lived access tokens.
pub struct RefreshTokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cached: Mutex<Option<AccessToken>>,
}

impl fmt::Debug for RefreshTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTokenProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Authorized-user token file as written by Google's client libraries.
#[derive(Debug, Deserialize)]
struct AuthorizedUserFile {
    #[serde(default)]
    token: Option<String>,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
}

impl RefreshTokenProvider {
    pub fn new(
        http: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: GOOGLE_TOKEN_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub fn with_cached_token(self, token: AccessToken) -> Self {
        Self {
            cached: Mutex::new(Some(token)),
            ..self
        }
    }

    pub fn from_token_file(http: reqwest::Client, path: &Path) -> Result<Self, CredentialError> {
        let file_err = |message: String| CredentialError::TokenFile {
            path: path.display().to_string(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
        let file: AuthorizedUserFile =
            serde_json::from_str(&text).map_err(|e| file_err(e.to_string()))?;

        let (Some(refresh_token), Some(client_id), Some(client_secret)) =
            (file.refresh_token, file.client_id, file.client_secret)
        else {
            return Err(CredentialError::MissingCredentials(format!(
                "{} lacks refresh_token/client_id/client_secret",
                path.display()
            )));
        };

        let mut provider = Self::new(http, client_id, client_secret, refresh_token);
        if let Some(uri) = file.token_uri {
            provider = provider.with_token_url(uri);
        }
        if let Some(token) = file.token {
            let expiry = file
                .expiry
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            // Without an expiry the cached token cannot be trusted.
            if expiry.is_some() {
                provider = provider.with_cached_token(AccessToken::new(token, expiry));
            }
        }
        Ok(provider)
    }

    async fn refresh(&self) -> Result<AccessToken, CredentialError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::Refresh(format!("http status {status}: {body}")));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;

        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));
        info!(?expires_at, "refreshed access token");
        Ok(AccessToken::new(token.access_token, expires_at))
    }
}

#[async_trait]
impl CredentialProvider for RefreshTokenProvider {
    async fn access_token(&self) -> Result<AccessToken, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh_at(Utc::now()) {
                return Ok(token.clone());
            }
        }
        let token = self.refresh().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

/// Picks a provider from the environment.
///
/// Order: `YTI_ACCESS_TOKEN`, then `YTI_TOKEN_FILE`, then
/// `YTI_CLIENT_ID` + `YTI_CLIENT_SECRET` + `YTI_REFRESH_TOKEN`.
pub fn credentials_from_env(
    http: reqwest::Client,
) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

    if let Some(token) = var("YTI_ACCESS_TOKEN") {
        return Ok(Arc::new(StaticTokenProvider::new(token)));
    }
    if let Some(path) = var("YTI_TOKEN_FILE") {
        return Ok(Arc::new(RefreshTokenProvider::from_token_file(
            http,
            Path::new(&path),
        )?));
    }
    match (var("YTI_CLIENT_ID"), var("YTI_CLIENT_SECRET"), var("YTI_REFRESH_TOKEN")) {
        (Some(id), Some(secret), Some(refresh)) => {
            Ok(Arc::new(RefreshTokenProvider::new(http, id, secret, refresh)))
        }
        _ => Err(CredentialError::MissingCredentials(
            "set YTI_ACCESS_TOKEN, YTI_TOKEN_FILE, or YTI_CLIENT_ID/YTI_CLIENT_SECRET/YTI_REFRESH_TOKEN"
                .into(),
        )),
    }
}

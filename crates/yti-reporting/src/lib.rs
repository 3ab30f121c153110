//! YouTube Reporting / Data API contracts, HTTP clients and the quota-aware report fetcher.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use yti_core::ReportInstance;

pub mod client;
pub mod credentials;
pub mod data_api;
pub mod fetcher;

pub use client::{GoogleHttp, HttpClientConfig, HttpReportingClient, REPORTING_BASE_URL};
pub use credentials::{
    credentials_from_env, AccessToken, CredentialError, CredentialProvider, RefreshTokenProvider,
    StaticTokenProvider,
};
pub use data_api::{
    ActivityItem, ChannelSummary, DataApiClient, PlaylistVideo, VideoAnalytics, VideoStats,
    ANALYTICS_BASE_URL, DATA_API_BASE_URL,
};
pub use fetcher::{FetchError, ReportFetcher};

pub const CRATE_NAME: &str = "yti-reporting";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// One page of `jobs.reports.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportsPage {
    #[serde(default)]
    pub reports: Vec<ReportInstance>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl ReportsPage {
    pub fn next_token(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// A report body being downloaded.
#[async_trait]
pub trait ReportBody: Send {
    /// `Ok(None)` once the body is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError>;
}

/// Request/response surface of the YouTube Reporting API.
#[async_trait]
pub trait ReportingApi: Send + Sync {
    async fn list_reports_page(
        &self,
        job_id: &str,
        page_token: Option<&str>,
    ) -> Result<ReportsPage, ApiError>;

    async fn open_download(&self, download_url: &str) -> Result<Box<dyn ReportBody>, ApiError>;
}

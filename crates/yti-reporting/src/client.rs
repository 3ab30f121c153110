//! reqwest-backed clients for the Google APIs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::credentials::CredentialProvider;
use crate::{ApiError, ReportBody, ReportingApi, ReportsPage};

pub const REPORTING_BASE_URL: &str = "https://youtubereporting.googleapis.com";

/// Timeouts for the shared client.
///
/// `read_timeout` is an idle limit between body reads, so a long report
/// download keeps going as long as bytes keep arriving. `request_timeout`
/// bounds whole JSON calls and is never applied to downloads.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

impl HttpClientConfig {
    pub fn build(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder.build().context("building reqwest client")
    }
}

/// Authorized GET helper shared by the Reporting and Data API clients.
#[derive(Clone)]
pub struct GoogleHttp {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    request_timeout: Option<Duration>,
}

impl GoogleHttp {
    pub fn new(client: reqwest::Client, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client,
            credentials,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// GET bounded by the request timeout, for small JSON responses.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, ApiError> {
        self.send(url, query, self.request_timeout).await
    }

    /// GET for streamed bodies; only the client's connect and idle timeouts apply.
    pub async fn get_stream(&self, url: &str) -> Result<reqwest::Response, ApiError> {
        self.send(url, &[], None).await
    }

    async fn send(
        &self,
        url: &str,
        query: &[(&str, &str)],
        total: Option<Duration>,
    ) -> Result<reqwest::Response, ApiError> {
        let token = self.credentials.access_token().await?;
        let mut request = self.client.get(url).bearer_auth(token.secret());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(total) = total {
            request = request.timeout(total);
        }
        let resp = request.send().await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let final_url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::HttpStatus {
            status: status.as_u16(),
            url: final_url,
            body,
        })
    }

    pub async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<JsonValue, ApiError> {
        let resp = self.get(url, query).await?;
        Ok(resp.json::<JsonValue>().await?)
    }
}

#[derive(Clone)]
pub struct HttpReportingClient {
    http: GoogleHttp,
    base_url: String,
}

impl HttpReportingClient {
    pub fn new(http: GoogleHttp) -> Self {
        Self {
            http,
            base_url: REPORTING_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn reports_url(&self, job_id: &str) -> String {
        format!("{}/v1/jobs/{}/reports", self.base_url, job_id)
    }
}

#[async_trait]
impl ReportingApi for HttpReportingClient {
    async fn list_reports_page(
        &self,
        job_id: &str,
        page_token: Option<&str>,
    ) -> Result<ReportsPage, ApiError> {
        let url = self.reports_url(job_id);
        let mut query = Vec::new();
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let resp = self.http.get(&url, &query).await?;
        let page = resp.json::<ReportsPage>().await?;
        debug!(job_id, reports = page.reports.len(), "listed report page");
        Ok(page)
    }

    async fn open_download(&self, download_url: &str) -> Result<Box<dyn ReportBody>, ApiError> {
        let response = self.http.get_stream(download_url).await?;
        Ok(Box::new(HttpReportBody { response }))
    }
}

struct HttpReportBody {
    response: reqwest::Response,
}

#[async_trait]
impl ReportBody for HttpReportBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError> {
        Ok(self.response.chunk().await?.map(|bytes| bytes.to_vec()))
    }
}

//! Quota-aware report listing and download.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use yti_core::ReportInstance;
use yti_storage::{DownloadedReport, RateLimiter, ReportSpool};

use crate::{ApiError, ReportingApi};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("listing reports for job {job_id} failed: {source}")]
    Upstream {
        job_id: String,
        #[source]
        source: ApiError,
    },
    #[error("downloading report {report_id} failed: {cause:#}")]
    Download {
        report_id: String,
        cause: anyhow::Error,
    },
}

impl FetchError {
    fn download(report_id: &str, cause: impl Into<anyhow::Error>) -> Self {
        Self::Download {
            report_id: report_id.to_string(),
            cause: cause.into(),
        }
    }
}

#[derive(Clone)]
pub struct ReportFetcher {
    api: Arc<dyn ReportingApi>,
    limiter: Arc<RateLimiter>,
}

impl ReportFetcher {
    pub fn new(api: Arc<dyn ReportingApi>, limiter: Arc<RateLimiter>) -> Self {
        Self { api, limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Every report instance currently available for `job_id`, across all pages.
    pub async fn list_reports(&self, job_id: &str) -> Result<Vec<ReportInstance>, FetchError> {
        let mut reports = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            self.limiter.acquire().await;
            let page = self
                .api
                .list_reports_page(job_id, page_token.as_deref())
                .await
                .map_err(|source| FetchError::Upstream {
                    job_id: job_id.to_string(),
                    source,
                })?;
            let next = page.next_token().map(str::to_string);
            reports.extend(page.reports);
            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(job_id, count = reports.len(), "listed reports");
        Ok(reports)
    }

    /// Streams the report body into the spool. Partial files never survive a failure.
    pub async fn download_report(
        &self,
        instance: &ReportInstance,
        spool: &ReportSpool,
    ) -> Result<DownloadedReport, FetchError> {
        let span = info_span!("report_download", report_id = %instance.id);
        async {
            self.limiter.acquire().await;

            let mut writer = spool
                .begin(&instance.id)
                .await
                .map_err(|e| FetchError::download(&instance.id, e))?;

            let mut body = match self.api.open_download(&instance.download_url).await {
                Ok(body) => body,
                Err(err) => {
                    writer.abort().await;
                    return Err(FetchError::download(&instance.id, err));
                }
            };

            loop {
                match body.next_chunk().await {
                    Ok(Some(chunk)) => {
                        if let Err(err) = writer.write_chunk(&chunk).await {
                            writer.abort().await;
                            return Err(FetchError::download(&instance.id, err));
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        writer.abort().await;
                        return Err(FetchError::download(&instance.id, err));
                    }
                }
            }

            let report = writer
                .finish()
                .await
                .map_err(|e| FetchError::download(&instance.id, e))?;
            debug!(bytes = report.byte_size, sha256 = %report.sha256, "report downloaded");
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

//! Wiring from `IngestConfig` to a runnable service, plus the scheduler.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use yti_reporting::{
    credentials_from_env, DataApiClient, GoogleHttp, HttpClientConfig, HttpReportingClient,
    ReportFetcher, ReportingApi,
};
use yti_storage::{KeyValueStore, MemoryStore, PgStore, RateLimiter, ReportSpool};

use crate::config::{load_jobs_file, IngestConfig, StoreKind};
use crate::pipeline::{IngestError, IngestPipeline, InvocationRequest, InvocationResponse, RunSummary};
use crate::retention::{CleanupSummary, RetentionCleaner};
use crate::uploader::DedupUploader;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRequest {
    pub tables: Vec<String>,
    #[serde(default)]
    pub retention_months: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub message: String,
    pub summary: CleanupSummary,
}

impl CleanupResponse {
    pub fn is_complete(&self) -> bool {
        self.summary.is_complete()
    }
}

/// Opens the configured backend, applying migrations for Postgres.
pub async fn open_store(config: &IngestConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.store {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Postgres => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

pub fn google_http(config: &IngestConfig) -> Result<GoogleHttp> {
    let http_config = HttpClientConfig {
        read_timeout: config.http_timeout(),
        request_timeout: config.http_timeout(),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    };
    let client = http_config.build()?;
    let credentials = credentials_from_env(client.clone()).context("resolving API credentials")?;
    Ok(GoogleHttp::new(client, credentials).with_request_timeout(http_config.request_timeout))
}

pub fn data_api_from_config(config: &IngestConfig, limiter: Arc<RateLimiter>) -> Result<DataApiClient> {
    Ok(DataApiClient::new(google_http(config)?, limiter)
        .with_base_url(config.data_api_base_url.clone())
        .with_analytics_base_url(config.analytics_base_url.clone()))
}

pub struct IngestService {
    config: IngestConfig,
    limiter: Arc<RateLimiter>,
    pipeline: IngestPipeline,
    cleaner: RetentionCleaner,
}

impl IngestService {
    pub fn new(config: IngestConfig, store: Arc<dyn KeyValueStore>, api: Arc<dyn ReportingApi>) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        let pipeline = IngestPipeline::new(
            ReportFetcher::new(api, limiter.clone()),
            DedupUploader::new(store.clone(), config.reports_table.clone()),
            ReportSpool::new(config.spool_dir.clone()),
        );
        Self {
            config,
            limiter,
            pipeline,
            cleaner: RetentionCleaner::new(store),
        }
    }

    pub async fn from_config(config: IngestConfig) -> Result<Self> {
        let store = open_store(&config).await?;
        let api = HttpReportingClient::new(google_http(&config)?)
            .with_base_url(config.reporting_base_url.clone());
        Ok(Self::new(config, store, Arc::new(api)))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn ingest(&self, request: &InvocationRequest) -> Result<InvocationResponse, IngestError> {
        self.pipeline.handle_invocation(request).await
    }

    /// Runs every job in the configured jobs file.
    pub async fn ingest_configured(&self) -> Result<RunSummary> {
        let jobs = load_jobs_file(&self.config.jobs_file).await?;
        Ok(self.pipeline.run(&jobs.report_jobs()).await?)
    }

    pub async fn cleanup(&self, request: &CleanupRequest) -> CleanupResponse {
        let months = request.retention_months.unwrap_or(self.config.retention_months);
        let summary = self.cleaner.clean(&request.tables, months).await;
        CleanupResponse {
            message: summary.message(),
            summary,
        }
    }

    /// Cleans `YTI_CLEANUP_TABLES`, or every table named in the jobs file when unset.
    pub async fn cleanup_configured(&self) -> Result<CleanupResponse> {
        let tables = if self.config.cleanup_tables.is_empty() {
            load_jobs_file(&self.config.jobs_file).await?.table_names()
        } else {
            self.config.cleanup_tables.clone()
        };
        Ok(self
            .cleanup(&CleanupRequest {
                tables,
                retention_months: None,
            })
            .await)
    }

    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let service = Arc::clone(self);
        let ingest = Job::new_async(self.config.ingest_cron.as_str(), move |_uuid, _l| {
            let service = Arc::clone(&service);
            Box::pin(async move {
                match service.ingest_configured().await {
                    Ok(summary) => info!(run_id = %summary.run_id, rows = summary.rows_uploaded(), "scheduled ingest finished"),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled ingest failed"),
                }
            })
        })
        .with_context(|| format!("creating ingest job for cron {}", self.config.ingest_cron))?;
        sched.add(ingest).await.context("adding ingest job")?;

        let service = Arc::clone(self);
        let cleanup = Job::new_async(self.config.cleanup_cron.as_str(), move |_uuid, _l| {
            let service = Arc::clone(&service);
            Box::pin(async move {
                match service.cleanup_configured().await {
                    Ok(response) if response.is_complete() => {
                        info!(deleted = response.summary.deleted, "{}", response.message)
                    }
                    Ok(response) => error!(
                        failed_tables = ?response.summary.failed_tables,
                        "{}", response.message
                    ),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled cleanup failed"),
                }
            })
        })
        .with_context(|| format!("creating cleanup job for cron {}", self.config.cleanup_cron))?;
        sched.add(cleanup).await.context("adding cleanup job")?;

        Ok(Some(sched))
    }
}

pub async fn run_ingest_once_from_env() -> Result<RunSummary> {
    let config = IngestConfig::from_env()?;
    IngestService::from_config(config).await?.ingest_configured().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use yti_reporting::{ApiError, ReportBody, ReportsPage};
    use yti_storage::{Item, TableSpec};

    struct NoReports;

    #[async_trait]
    impl ReportingApi for NoReports {
        async fn list_reports_page(
            &self,
            _job_id: &str,
            _page_token: Option<&str>,
        ) -> Result<ReportsPage, ApiError> {
            Ok(ReportsPage::default())
        }

        async fn open_download(&self, url: &str) -> Result<Box<dyn ReportBody>, ApiError> {
            Err(ApiError::Decode {
                url: url.to_string(),
                message: "no reports".into(),
            })
        }
    }

    fn service(config: IngestConfig, store: Arc<MemoryStore>) -> IngestService {
        IngestService::new(config, store, Arc::new(NoReports))
    }

    fn row(key: &str, create_time: &str) -> Item {
        match json!({"composite_key": key, "createTime": create_time}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn cleanup_defaults_to_configured_tables_from_jobs_file() {
        let dir = tempfile::tempdir().unwrap();
        let jobs_file = dir.path().join("jobs.yaml");
        std::fs::write(
            &jobs_file,
            "jobs:\n  job-a:\n    table_name: basic\n    composite_key_cols: [date]\n",
        )
        .unwrap();

        let month = chrono::Utc::now().format("%Y-%m").to_string();
        let store = Arc::new(MemoryStore::new());
        store
            .batch_put(
                &TableSpec::report_rows("basic"),
                vec![
                    row(&format!("{month}-01T00:00:00Z"), "a"),
                    row(&format!("{month}-01T00:00:00Z"), "b"),
                ],
            )
            .await
            .unwrap();

        let config = IngestConfig {
            jobs_file,
            store: StoreKind::Memory,
            ..Default::default()
        };
        let response = service(config, store.clone()).cleanup_configured().await.unwrap();
        assert_eq!(response.message, "Cleanup process completed successfully.");
        assert_eq!(response.summary.deleted, 1);
        assert_eq!(store.items("basic").await[0]["createTime"], "b");
    }

    #[tokio::test]
    async fn scheduler_is_off_unless_enabled() {
        let svc = Arc::new(service(IngestConfig::default(), Arc::new(MemoryStore::new())));
        assert!(svc.maybe_build_scheduler().await.unwrap().is_none());
    }

    #[test]
    fn cleanup_request_months_are_optional() {
        let request: CleanupRequest = serde_json::from_str(r#"{"tables":["a","b"]}"#).unwrap();
        assert_eq!(request.tables, ["a", "b"]);
        assert!(request.retention_months.is_none());
    }
}

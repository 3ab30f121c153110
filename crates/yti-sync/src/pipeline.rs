//! Per-job ingest control flow: list, dedup, download, transform, upload, mark.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use yti_core::{ReportInstance, ReportJob};
use yti_reporting::{FetchError, ReportFetcher};
use yti_storage::{DownloadedReport, ReportSpool, StoreError};

use crate::config::JobsConfig;
use crate::transform::{parse_report_csv, RecordTransformer, TransformError};
use crate::uploader::{DedupUploader, UploadError};

pub const INGEST_COMPLETED_MESSAGE: &str = "Reports retrieved and new ones loaded to the store.";

/// Where a report instance is in its ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    Listed,
    Skipped,
    Downloading,
    Transforming,
    Uploading,
    Marked,
}

impl fmt::Display for ReportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Listed => "listed",
            Self::Skipped => "skipped",
            Self::Downloading => "downloading",
            Self::Transforming => "transforming",
            Self::Uploading => "uploading",
            Self::Marked => "marked",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("checking processed reports for job {job_id}: {source}")]
    MarkerLookup {
        job_id: String,
        #[source]
        source: StoreError,
    },
    #[error("transforming report {report_id}: {source}")]
    Transform {
        report_id: String,
        #[source]
        source: TransformError,
    },
    #[error("uploading report {report_id}: {source}")]
    Upload {
        report_id: String,
        #[source]
        source: UploadError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub table_name: String,
    pub listed: usize,
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    pub rows_uploaded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    pub fn rows_uploaded(&self) -> usize {
        self.jobs.iter().map(|j| j.rows_uploaded).sum()
    }
}

pub type InvocationRequest = JobsConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub message: String,
}

impl InvocationResponse {
    pub fn completed() -> Self {
        Self {
            message: INGEST_COMPLETED_MESSAGE.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct IngestPipeline {
    fetcher: ReportFetcher,
    uploader: DedupUploader,
    transformer: RecordTransformer,
    spool: ReportSpool,
}

impl IngestPipeline {
    pub fn new(fetcher: ReportFetcher, uploader: DedupUploader, spool: ReportSpool) -> Self {
        Self {
            fetcher,
            uploader,
            transformer: RecordTransformer::new(),
            spool,
        }
    }

    /// Entry point for every invocation surface.
    pub async fn handle_invocation(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, IngestError> {
        self.run(&request.report_jobs()).await?;
        Ok(InvocationResponse::completed())
    }

    /// Runs jobs in order; the first failing job stops the run.
    pub async fn run(&self, jobs: &[ReportJob]) -> Result<RunSummary, IngestError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut summaries = Vec::with_capacity(jobs.len());
        for job in jobs {
            summaries.push(self.process_job(job).await?);
        }
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            jobs: summaries,
        };
        info!(%run_id, jobs = summary.jobs.len(), rows = summary.rows_uploaded(), "ingest run finished");
        Ok(summary)
    }

    /// Attempts every new report of `job`, then surfaces the first report failure.
    pub async fn process_job(&self, job: &ReportJob) -> Result<JobSummary, IngestError> {
        let span = info_span!("ingest_job", job_id = %job.job_id, table = %job.table_name);
        async {
            let listed = self.fetcher.list_reports(&job.job_id).await?;
            let mut summary = JobSummary {
                job_id: job.job_id.clone(),
                table_name: job.table_name.clone(),
                listed: listed.len(),
                ..Default::default()
            };

            let fresh = self
                .uploader
                .filter_new_reports(&job.job_id, listed)
                .await
                .map_err(|source| IngestError::MarkerLookup {
                    job_id: job.job_id.clone(),
                    source,
                })?;
            summary.skipped = summary.listed - fresh.len();
            if summary.skipped > 0 {
                debug!(count = summary.skipped, state = %ReportState::Skipped, "reports already processed");
            }

            let mut first_error = None;
            for instance in &fresh {
                let span = info_span!("ingest_report", report_id = %instance.id);
                match self.process_report(job, instance).instrument(span).await {
                    Ok(rows) => {
                        summary.processed += 1;
                        summary.rows_uploaded += rows;
                    }
                    Err(err) => {
                        summary.failed += 1;
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }

            info!(
                listed = summary.listed,
                skipped = summary.skipped,
                processed = summary.processed,
                failed = summary.failed,
                rows = summary.rows_uploaded,
                "job finished"
            );
            match first_error {
                Some(err) => Err(err),
                None => Ok(summary),
            }
        }
        .instrument(span)
        .await
    }

    async fn process_report(
        &self,
        job: &ReportJob,
        instance: &ReportInstance,
    ) -> Result<usize, IngestError> {
        let mut state = ReportState::Listed;
        let result = self.advance(job, instance, &mut state).await;
        match &result {
            Ok(rows) => info!(rows, state = %state, "report ingested"),
            Err(err) => error!(state = %state, error = %err, "report failed, left unmarked"),
        }
        result
    }

    async fn advance(
        &self,
        job: &ReportJob,
        instance: &ReportInstance,
        state: &mut ReportState,
    ) -> Result<usize, IngestError> {
        *state = ReportState::Downloading;
        let downloaded = self.fetcher.download_report(instance, &self.spool).await?;

        let result = self.load(job, instance, &downloaded, state).await;
        if let Err(err) = self.spool.remove(&downloaded).await {
            warn!(error = %format!("{err:#}"), "could not remove spooled report");
        }
        result
    }

    async fn load(
        &self,
        job: &ReportJob,
        instance: &ReportInstance,
        downloaded: &DownloadedReport,
        state: &mut ReportState,
    ) -> Result<usize, IngestError> {
        *state = ReportState::Transforming;
        let transform_err = |source| IngestError::Transform {
            report_id: instance.id.clone(),
            source,
        };
        let bytes = tokio::fs::read(&downloaded.path).await.map_err(|source| {
            transform_err(TransformError::Io {
                path: downloaded.path.display().to_string(),
                source,
            })
        })?;
        let raw = parse_report_csv(bytes.as_slice()).map_err(transform_err)?;
        let records = self
            .transformer
            .transform(&raw, job, &instance.create_time)
            .map_err(transform_err)?;

        *state = ReportState::Uploading;
        let upload_err = |source| IngestError::Upload {
            report_id: instance.id.clone(),
            source,
        };
        let rows = if records.is_empty() {
            0
        } else {
            self.uploader
                .upload_records(&records, &job.table_name)
                .await
                .map_err(upload_err)?
        };
        self.uploader.mark_processed(instance).await.map_err(upload_err)?;
        *state = ReportState::Marked;
        Ok(rows)
    }
}

//! Report ingestion pipeline, retention cleanup and scheduling.

pub mod config;
pub mod pipeline;
pub mod retention;
pub mod service;
pub mod transform;
pub mod uploader;

pub use config::{load_jobs_file, IngestConfig, JobsConfig, StoreKind};
pub use pipeline::{
    IngestError, IngestPipeline, InvocationRequest, InvocationResponse, JobSummary, ReportState,
    RunSummary, INGEST_COMPLETED_MESSAGE,
};
pub use retention::{
    month_prefixes, CleanupSummary, DeleteError, RetentionCleaner, CLEANUP_COMPLETED_MESSAGE,
    DEFAULT_RETENTION_MONTHS,
};
pub use service::{
    data_api_from_config, google_http, open_store, run_ingest_once_from_env, CleanupRequest,
    CleanupResponse, IngestService,
};
pub use transform::{
    composite_key, normalize_report_date, parse_report_csv, quantize_decimal, RawReport, RawRow,
    RecordTransformer, TransformError,
};
pub use uploader::{DedupUploader, UploadError};

pub const CRATE_NAME: &str = "yti-sync";

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};
use yti_storage::{PgStore, RateLimiter};
use yti_sync::{
    data_api_from_config, load_jobs_file, open_store, CleanupResponse, IngestConfig, IngestService,
    RetentionCleaner,
};

#[derive(Debug, Parser)]
#[command(name = "yti-cli")]
#[command(about = "YouTube Reporting ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest new reports for every job in the jobs file.
    Ingest {
        #[arg(long)]
        jobs_file: Option<PathBuf>,
    },
    /// Drop superseded rows inside the retention window.
    Clean {
        /// Tables to clean; defaults to YTI_CLEANUP_TABLES or the jobs file tables.
        tables: Vec<String>,
        #[arg(long)]
        months: Option<u32>,
    },
    /// Serve the HTTP entry points (and the scheduler when enabled).
    Serve,
    /// Run the scheduler without the HTTP server.
    Schedule,
    Migrate,
    /// Print a channel summary and its uploads as JSON.
    Channel {
        handle: String,
        #[arg(long)]
        with_videos: bool,
    },
    /// Print a channel's video activities published after a date.
    Activities {
        channel_id: String,
        #[arg(long)]
        since: NaiveDate,
    },
    /// Print daily analytics for one video as JSON records.
    VideoAnalytics {
        video_id: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info")?;
    let cli = Cli::parse();
    let mut config = IngestConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Ingest { jobs_file: None }) {
        Commands::Ingest { jobs_file } => {
            if let Some(path) = jobs_file {
                config.jobs_file = path;
            }
            let service = IngestService::from_config(config).await?;
            let summary = service.ingest_configured().await?;
            println!(
                "ingest complete: run_id={} jobs={} rows={}",
                summary.run_id,
                summary.jobs.len(),
                summary.rows_uploaded()
            );
        }
        Commands::Clean { tables, months } => {
            if !tables.is_empty() {
                config.cleanup_tables = tables;
            }
            if let Some(months) = months {
                config.retention_months = months;
            }
            if config.cleanup_tables.is_empty() {
                config.cleanup_tables = load_jobs_file(&config.jobs_file).await?.table_names();
            }
            let store = open_store(&config).await?;
            let summary = RetentionCleaner::new(store)
                .clean(&config.cleanup_tables, config.retention_months)
                .await;
            let response = CleanupResponse {
                message: summary.message(),
                summary,
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.is_complete() {
                anyhow::bail!("{}", response.message);
            }
        }
        Commands::Serve => {
            yti_web::serve_from_env().await?;
        }
        Commands::Schedule => {
            config.scheduler_enabled = true;
            let service = Arc::new(IngestService::from_config(config).await?);
            let mut sched = service
                .maybe_build_scheduler()
                .await?
                .context("scheduler was not built")?;
            sched.start().await?;
            info!("scheduler running, ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await?;
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Channel { handle, with_videos } => {
            let limiter = Arc::new(RateLimiter::new(config.rate_limit));
            let client = data_api_from_config(&config, limiter)?;
            let channel = client.channel_by_handle(&handle).await?;
            let mut out = serde_json::json!({ "channel": channel });
            if with_videos {
                let videos = client.playlist_items(&channel.uploads_playlist_id).await?;
                out["videos"] = serde_json::to_value(videos)?;
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Activities { channel_id, since } => {
            let limiter = Arc::new(RateLimiter::new(config.rate_limit));
            let client = data_api_from_config(&config, limiter)?;
            let published_after = since.and_time(NaiveTime::MIN).and_utc();
            let activities = client.activities(&channel_id, published_after).await?;
            println!("{}", serde_json::to_string_pretty(&activities)?);
        }
        Commands::VideoAnalytics { video_id, start, end } => {
            if end < start {
                anyhow::bail!("--end {end} is before --start {start}");
            }
            let limiter = Arc::new(RateLimiter::new(config.rate_limit));
            let client = data_api_from_config(&config, limiter)?;
            let analytics = client.video_analytics(&video_id, start, end).await?;
            println!("{}", serde_json::to_string_pretty(&analytics.records())?);
        }
    }

    Ok(())
}

//! HTTP entry points for ingest and cleanup invocations.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};
use yti_sync::{CleanupRequest, IngestConfig, IngestService, InvocationRequest};

pub const CRATE_NAME: &str = "yti-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IngestService>,
}

impl AppState {
    pub fn new(service: Arc<IngestService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/invoke", post(invoke_handler))
        .route("/cleanup", post(cleanup_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = IngestConfig::from_env()?;
    let port = config.web_port;
    let service = Arc::new(IngestService::from_config(config).await?);

    let scheduler = service.maybe_build_scheduler().await?;
    if let Some(sched) = &scheduler {
        sched.start().await?;
        info!("scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(AppState::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(mut sched) = scheduler {
        sched.shutdown().await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "could not listen for shutdown signal");
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn invoke_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvocationRequest>,
) -> Response {
    match state.service.ingest(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => {
            error!(error = %err, "invocation failed");
            server_error(err.to_string())
        }
    }
}

async fn cleanup_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CleanupRequest>,
) -> Response {
    let response = state.service.cleanup(&request).await;
    if response.is_complete() {
        Json(response).into_response()
    } else {
        error!(failed_tables = ?response.summary.failed_tables, "cleanup incomplete");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
    }
}

fn server_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: message }),
    )
        .into_response()
}

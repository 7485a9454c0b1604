pub mod monitoring;

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::FutureExt;
use prometheus_client::encoding::text::encode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Instrument};

use crate::logging::format_error_chain;
use crate::pipeline::{PipelineError, RunOutcome};
use crate::state::AppState;
use monitoring::{FailureLabels, INGEST_METRICS};

pub const MESSAGE_LOADED: &str = "Raw data ingested to BigQuery.";
pub const MESSAGE_NO_NEW_DATA: &str = "No new raw reviews fetched. BigQuery table not updated.";
pub const MESSAGE_FAILED: &str = "Raw data ingestion to BigQuery failed";

/// Body of every trigger response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_loaded: Option<u64>,
}

impl TriggerResponse {
    fn new(status: &str, message: impl Into<String>, rows_loaded: Option<u64>) -> Self {
        Self {
            status: status.to_string(),
            message: message.into(),
            rows_loaded,
        }
    }
}

/// Maps a finished run to the HTTP answer. Per-entity detail never appears here.
pub fn outcome_response(
    result: &Result<RunOutcome, PipelineError>,
) -> (StatusCode, TriggerResponse) {
    match result {
        Ok(RunOutcome::Loaded { rows_loaded, .. }) => (
            StatusCode::OK,
            TriggerResponse::new("success", MESSAGE_LOADED, Some(*rows_loaded)),
        ),
        Ok(RunOutcome::NoNewData { .. }) => (
            StatusCode::OK,
            TriggerResponse::new("success", MESSAGE_NO_NEW_DATA, None),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            TriggerResponse::new(
                "failed",
                format!("{MESSAGE_FAILED}: {}", one_line_chain(err)),
                None,
            ),
        ),
    }
}

fn one_line_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> impl IntoResponse {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    match encode(&mut buffer, &registry) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(err) => {
            error!(event = "metrics_encode_failed", error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// Runs one ingestion inside the request. Dropping the request drops the run with it.
async fn trigger_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<TriggerResponse>) {
    let (status, body) = execute_run(&state).await;
    (status, Json(body))
}

/// One bounded run: the configured budget applies and a panic is reported instead of
/// tearing down the connection.
pub async fn execute_run(state: &AppState) -> (StatusCode, TriggerResponse) {
    let run_id = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
    let span = tracing::info_span!("ingestion_run", run_id = %run_id);
    let metrics = INGEST_METRICS.get();
    if let Some(metrics) = metrics {
        metrics.runs_started.inc();
    }

    let started = Instant::now();
    let guarded = AssertUnwindSafe(state.runner.run_once()).catch_unwind();
    let result = tokio::time::timeout(state.run_timeout, guarded)
        .instrument(span.clone())
        .await;
    let _entered = span.enter();
    if let Some(metrics) = metrics {
        metrics
            .last_run_duration_ms
            .set(started.elapsed().as_millis() as i64);
    }

    match result {
        Ok(Ok(outcome)) => {
            let (status, body) = outcome_response(&outcome);
            match &outcome {
                Ok(RunOutcome::Loaded {
                    rows_loaded,
                    object,
                    summary,
                }) => {
                    if let Some(metrics) = metrics {
                        metrics.runs_succeeded.inc();
                    }
                    info!(
                        event = "run_succeeded",
                        rows_loaded,
                        uri = %object.uri,
                        entities = summary.entities_attempted,
                        entities_aborted = summary.entities_aborted,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "ingestion run loaded rows"
                    );
                }
                Ok(RunOutcome::NoNewData { summary }) => {
                    if let Some(metrics) = metrics {
                        metrics.runs_noop.inc();
                    }
                    info!(
                        event = "run_noop",
                        entities = summary.entities_attempted,
                        entities_aborted = summary.entities_aborted,
                        "ingestion run found nothing to load"
                    );
                }
                Err(err) => {
                    if let Some(metrics) = metrics {
                        metrics
                            .runs_failed
                            .get_or_create(&FailureLabels { stage: err.stage() })
                            .inc();
                    }
                    error!(
                        event = "run_failed",
                        stage = err.stage(),
                        error = %format_error_chain(err),
                        "ingestion run failed"
                    );
                }
            }
            (status, body)
        }
        Ok(Err(panic)) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            if let Some(metrics) = metrics {
                metrics
                    .runs_failed
                    .get_or_create(&FailureLabels { stage: "panic" })
                    .inc();
            }
            error!(event = "run_panicked", detail = %detail, "ingestion run panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                TriggerResponse::new("error", format!("ingestion run panicked: {detail}"), None),
            )
        }
        Err(_elapsed) => {
            if let Some(metrics) = metrics {
                metrics.runs_timed_out.inc();
            }
            warn!(
                event = "run_timed_out",
                budget_secs = state.run_timeout.as_secs(),
                "ingestion run exceeded its execution budget; staged objects are kept"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                TriggerResponse::new(
                    "error",
                    format!(
                        "ingestion run exceeded its {}s execution budget",
                        state.run_timeout.as_secs()
                    ),
                    None,
                ),
            )
        }
    }
}

/// Registers process metrics into the state's registry. Call once per state.
pub async fn register_metrics(state: &AppState) {
    let mut registry = state.registry.write().await;
    INGEST_METRICS
        .get_or_init(|| async { monitoring::IngestMetrics::register(&mut registry, "ingest") })
        .await;
    monitoring::register_build_info_metric(&mut registry, "worker");
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(trigger_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state)
}

/// Binds the trigger/health/metrics server and serves until the shutdown token fires.
///
/// Returns the bound address, which differs from `addr` when port 0 was requested.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    register_metrics(&state).await;

    let shutdown_token = state.shutdown_token.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(event = "server_listening", addr = %local_addr, "trigger endpoint listening");

    let server_handle = tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await;
        if let Err(err) = served {
            error!(event = "server_failed", error = %err, "trigger server stopped with an error");
        }
    });

    Ok((local_addr, server_handle))
}

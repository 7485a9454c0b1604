use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::{Config, ConfigError};
use crate::http_client::{global_rate_limiter, HttpError, RetryPolicy, SourceClient};
use crate::landing_zone::{LandingZoneWriter, StagingWriteError};
use crate::logging::{format_error_chain, init_logging};
use crate::pipeline::{BatchOrchestrator, DedupStrategy, IngestionPipeline, IngestionRunner};
use crate::server::{execute_run, register_metrics, setup_server_with_addr};
use crate::sources::{
    PaginatedReviewFetcher, PaginationSettings, SteamReviewsClient, SteamSpyClient,
};
use crate::state::AppState;
use crate::warehouse::{raw_reviews_schema, BigQueryClient, TableRef, WarehouseLoader};

const SERVICE_NAME: &str = "ingest_worker";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
    #[error("failed to open landing zone")]
    LandingZone(#[from] StagingWriteError),
    #[error("outbound connectivity check against {url} failed")]
    NetworkCheck {
        url: String,
        #[source]
        source: HttpError,
    },
    #[error("invalid bind address {0:?}")]
    BindAddress(String),
    #[error("failed to start trigger endpoint on {addr}")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Landing zone selected by configuration: a local directory when `LANDING_ZONE_ROOT` is set,
/// otherwise the configured GCS bucket.
pub fn build_landing_zone(config: &Config) -> Result<LandingZoneWriter, StartupError> {
    let writer = match &config.landing_zone_root {
        Some(root) => LandingZoneWriter::local(root, &config.landing_zone_prefix)?,
        None => LandingZoneWriter::gcs(&config.gcs_bucket_name, &config.landing_zone_prefix)?,
    };
    Ok(writer)
}

pub fn pagination_settings(config: &Config) -> PaginationSettings {
    PaginationSettings {
        page_size: config.reviews_per_page,
        max_pages: config.max_pages,
        inter_page_delay: config.page_delay,
        retry_policy: RetryPolicy {
            max_attempts: config.page_retry_attempts,
            ..RetryPolicy::default()
        },
    }
}

/// Wires the production clients into one pipeline. Nothing here touches the network.
pub fn build_runner(
    config: &Config,
    landing_zone: LandingZoneWriter,
) -> Result<Arc<dyn IngestionRunner>, StartupError> {
    let limiter = global_rate_limiter(config.global_rps);
    let http =
        SourceClient::new(config.request_timeout, limiter).map_err(StartupError::HttpClient)?;

    let ranking = SteamSpyClient::new(http.clone(), config.steamspy_api_url.clone());
    let reviews = SteamReviewsClient::new(
        http,
        config.steam_reviews_api_url.clone(),
        config.review_language.clone(),
    );
    let orchestrator = BatchOrchestrator::new(
        ranking,
        PaginatedReviewFetcher::new(reviews, pagination_settings(config)),
        config.top_n,
        config.entity_concurrency,
        DedupStrategy::from_key(config.dedup_key.as_deref()),
    );

    let bigquery = BigQueryClient::new(
        &config.bq_api_url,
        config.bq_access_token.clone(),
        config.request_timeout,
    )
    .map_err(StartupError::HttpClient)?;
    let loader = WarehouseLoader::new(
        bigquery,
        TableRef::new(&config.bq_project_id, &config.bq_dataset_id, &config.bq_table_id),
        config.region.clone(),
        raw_reviews_schema(),
        config.job_poll_interval,
    );

    Ok(Arc::new(IngestionPipeline::new(
        orchestrator,
        landing_zone,
        loader,
    )))
}

async fn check_network(config: &Config) -> Result<(), StartupError> {
    let probe = SourceClient::new(
        Duration::from_secs(5),
        global_rate_limiter(config.global_rps),
    )
    .map_err(StartupError::HttpClient)?;
    probe
        .probe(&config.steamspy_api_url)
        .await
        .map_err(|source| StartupError::NetworkCheck {
            url: config.steamspy_api_url.clone(),
            source,
        })
}

pub fn resolve_bind_addr(cli: &Cli, config: &Config) -> Result<SocketAddr, StartupError> {
    let raw = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("0.0.0.0:{}", config.port));
    raw.parse().map_err(|_| StartupError::BindAddress(raw))
}

/// Cancels `token` on SIGTERM or SIGINT.
async fn handle_shutdown_signals(token: CancellationToken) {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(err), _) | (_, Err(err)) => {
            warn!(event = "signal_handler_failed", error = %err, "cannot watch shutdown signals");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!(event = "shutdown_signal", signal = "SIGTERM", "shutting down");
        }
        _ = sigint.recv() => {
            info!(event = "shutdown_signal", signal = "SIGINT", "shutting down");
        }
    }
    token.cancel();
}

/// Process entry point. Returns the exit code.
///
/// In `--once` mode a single run executes and its success decides the exit status; otherwise
/// the trigger endpoint serves until a shutdown signal arrives.
pub async fn run_service(cli: Cli) -> i32 {
    dotenv().ok();
    let logging_context = init_logging(SERVICE_NAME, &cli.log_level);

    match start(cli).await {
        Ok(code) => code,
        Err(err) => {
            let report = format_error_chain(&err);
            error!(
                event = "startup_failed",
                run_id = %logging_context.run_id,
                error = %err,
                error_report = %report,
                "ingest worker failed to start"
            );
            eprintln!("{report}");
            match err {
                StartupError::Config(_) | StartupError::BindAddress(_) => 2,
                _ => 1,
            }
        }
    }
}

async fn start(cli: Cli) -> Result<i32, StartupError> {
    let config = Config::from_env()?;
    info!(
        event = "config_loaded",
        table = %config.table_path(),
        bucket = %config.gcs_bucket_name,
        top_n = config.top_n,
        max_pages = config.max_pages,
        entity_concurrency = config.entity_concurrency,
        "configuration loaded"
    );

    if cli.skip_network_check {
        info!(event = "network_check_skipped", "skipping outbound connectivity check");
    } else {
        check_network(&config).await?;
        info!(event = "network_check_passed", "outbound connectivity confirmed");
    }

    let landing_zone = build_landing_zone(&config)?;
    let runner = build_runner(&config, landing_zone)?;
    let state = Arc::new(AppState::new(
        runner,
        CancellationToken::new(),
        config.run_timeout,
    ));

    if cli.once {
        register_metrics(&state).await;
        let (status, body) = execute_run(&state).await;
        println!("{}", serde_json::to_string(&body).unwrap_or_default());
        return Ok(if status.is_success() { 0 } else { 1 });
    }

    let addr = resolve_bind_addr(&cli, &config)?;
    let shutdown_handle = tokio::spawn(handle_shutdown_signals(state.shutdown_token.clone()));
    let (_bound, server_handle) = setup_server_with_addr(Arc::clone(&state), addr)
        .await
        .map_err(|source| StartupError::Serve { addr, source })?;

    if let Err(err) = server_handle.await {
        error!(event = "server_task_failed", error = %err, "trigger server task ended abnormally");
        return Ok(1);
    }
    shutdown_handle.abort();
    info!(event = "shutdown_complete", "ingest worker stopped");
    Ok(0)
}

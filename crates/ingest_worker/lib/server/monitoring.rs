use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers build metadata as a labeled gauge pinned to `1`.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "ingest_worker",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

/// Label set for failed runs, keyed by the pipeline stage that failed.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FailureLabels {
    pub stage: &'static str,
}

#[derive(Clone)]
pub struct IngestMetrics {
    /// Triggers accepted, whatever their outcome.
    pub runs_started: Counter,
    /// Runs that loaded at least one row.
    pub runs_succeeded: Counter,
    /// Runs that completed with nothing new to load.
    pub runs_noop: Counter,
    pub runs_failed: Family<FailureLabels, Counter>,
    /// Runs cut off by the execution budget.
    pub runs_timed_out: Counter,
    pub entities_aborted: Counter,
    pub pages_fetched: Counter,
    pub reviews_fetched: Counter,
    pub rows_loaded: Counter,
    /// Records in the most recent batch, before the no-op check.
    pub last_batch_size: Gauge,
    pub last_run_duration_ms: Gauge,
}

impl IngestMetrics {
    fn init() -> Self {
        Self {
            runs_started: Counter::default(),
            runs_succeeded: Counter::default(),
            runs_noop: Counter::default(),
            runs_failed: Family::default(),
            runs_timed_out: Counter::default(),
            entities_aborted: Counter::default(),
            pages_fetched: Counter::default(),
            reviews_fetched: Counter::default(),
            rows_loaded: Counter::default(),
            last_batch_size: Gauge::default(),
            last_run_duration_ms: Gauge::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "runs_started",
            "Total number of ingestion runs triggered",
            metrics.runs_started.clone(),
        );
        sub_registry.register(
            "runs_succeeded",
            "Total number of ingestion runs that loaded rows",
            metrics.runs_succeeded.clone(),
        );
        sub_registry.register(
            "runs_noop",
            "Total number of ingestion runs with no new data",
            metrics.runs_noop.clone(),
        );
        sub_registry.register(
            "runs_failed",
            "Total number of failed ingestion runs by stage",
            metrics.runs_failed.clone(),
        );
        sub_registry.register(
            "runs_timed_out",
            "Total number of ingestion runs that exceeded the execution budget",
            metrics.runs_timed_out.clone(),
        );
        sub_registry.register(
            "entities_aborted",
            "Total number of entities whose pagination stopped on a fetch failure",
            metrics.entities_aborted.clone(),
        );
        sub_registry.register(
            "pages_fetched",
            "Total number of review pages fetched",
            metrics.pages_fetched.clone(),
        );
        sub_registry.register(
            "reviews_fetched",
            "Total number of review records collected",
            metrics.reviews_fetched.clone(),
        );
        sub_registry.register(
            "rows_loaded",
            "Total number of rows appended to the warehouse",
            metrics.rows_loaded.clone(),
        );
        sub_registry.register(
            "last_batch_size",
            "Number of records in the most recent batch",
            metrics.last_batch_size.clone(),
        );
        sub_registry.register(
            "last_run_duration_ms",
            "Wall time of the most recent run in milliseconds",
            metrics.last_run_duration_ms.clone(),
        );
        metrics
    }
}

pub static INGEST_METRICS: OnceCell<IngestMetrics> = OnceCell::const_new();

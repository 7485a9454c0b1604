//! One ingestion run: rank, fetch, stage, load.

mod dedup;
mod error;
mod orchestrator;

pub use dedup::DedupStrategy;
pub use error::PipelineError;
pub use orchestrator::{BatchOrchestrator, IngestionBatch, RunSummary};

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::info;

use crate::landing_zone::{LandingZoneObject, LandingZoneWriter};
use crate::server::monitoring::INGEST_METRICS;
use crate::sources::{RankingSource, ReviewPageSource};
use crate::warehouse::{WarehouseApi, WarehouseLoader};

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every entity came back empty. Nothing was staged or loaded.
    NoNewData { summary: RunSummary },
    Loaded {
        rows_loaded: u64,
        object: LandingZoneObject,
        summary: RunSummary,
    },
}

pub struct IngestionPipeline<R, S, W>
where
    R: RankingSource,
    S: ReviewPageSource,
    W: WarehouseApi,
{
    orchestrator: BatchOrchestrator<R, S>,
    writer: LandingZoneWriter,
    loader: WarehouseLoader<W>,
}

impl<R, S, W> IngestionPipeline<R, S, W>
where
    R: RankingSource,
    S: ReviewPageSource,
    W: WarehouseApi,
{
    pub fn new(
        orchestrator: BatchOrchestrator<R, S>,
        writer: LandingZoneWriter,
        loader: WarehouseLoader<W>,
    ) -> Self {
        Self {
            orchestrator,
            writer,
            loader,
        }
    }

    /// Runs the stages strictly in sequence and stops at the first run-level failure.
    ///
    /// An object that was staged before a later failure stays in the landing zone.
    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        self.loader.ensure_schema().await?;

        let (batch, summary) = self.orchestrator.run().await?;
        if let Some(metrics) = INGEST_METRICS.get() {
            metrics.last_batch_size.set(batch.len() as i64);
        }
        if batch.is_empty() {
            info!(
                event = "no_new_data",
                entities = summary.entities_attempted,
                "no reviews fetched, warehouse not updated"
            );
            return Ok(RunOutcome::NoNewData { summary });
        }

        let object = self.writer.write(batch.records(), Utc::now()).await?;
        let rows_loaded = self.loader.load(&object).await?;
        if let Some(metrics) = INGEST_METRICS.get() {
            metrics.rows_loaded.inc_by(rows_loaded);
        }

        Ok(RunOutcome::Loaded {
            rows_loaded,
            object,
            summary,
        })
    }
}

/// Object-safe handle on a fully wired pipeline, so the server does not carry its generics.
pub trait IngestionRunner: Send + Sync {
    fn run_once(&self) -> BoxFuture<'_, Result<RunOutcome, PipelineError>>;
}

impl<R, S, W> IngestionRunner for IngestionPipeline<R, S, W>
where
    R: RankingSource,
    S: ReviewPageSource,
    W: WarehouseApi,
{
    fn run_once(&self) -> BoxFuture<'_, Result<RunOutcome, PipelineError>> {
        Box::pin(self.run())
    }
}

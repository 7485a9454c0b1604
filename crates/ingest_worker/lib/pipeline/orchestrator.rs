use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::{info, warn};

use super::dedup::DedupStrategy;
use super::error::PipelineError;
use crate::server::monitoring::INGEST_METRICS;
use crate::sources::{
    PaginatedReviewFetcher, RankingSource, RawReviewRecord, ReviewPageSource, SourceError,
};

/// All records collected in one run, grouped by entity in rank order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionBatch {
    records: Vec<RawReviewRecord>,
}

impl IngestionBatch {
    pub fn records(&self) -> &[RawReviewRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<RawReviewRecord> {
        self.records
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub entities_ranked: usize,
    pub entities_attempted: usize,
    pub entities_aborted: usize,
    pub entities_empty: usize,
    pub records_fetched: usize,
    pub duplicates_dropped: usize,
}

pub struct BatchOrchestrator<R, S>
where
    R: RankingSource,
    S: ReviewPageSource,
{
    ranking: R,
    fetcher: PaginatedReviewFetcher<S>,
    top_n: usize,
    entity_concurrency: usize,
    dedup: DedupStrategy,
}

impl<R, S> BatchOrchestrator<R, S>
where
    R: RankingSource,
    S: ReviewPageSource,
{
    pub fn new(
        ranking: R,
        fetcher: PaginatedReviewFetcher<S>,
        top_n: usize,
        entity_concurrency: usize,
        dedup: DedupStrategy,
    ) -> Self {
        Self {
            ranking,
            fetcher,
            top_n,
            entity_concurrency: entity_concurrency.max(1),
            dedup,
        }
    }

    /// Ranks once, then walks every entity's reviews.
    ///
    /// Only a ranking failure fails the run, and an empty ranking counts as one. With
    /// `entity_concurrency > 1` up to that many entities are paginated at once, but results
    /// are still consumed in rank order, so the batch is grouped by entity exactly as in the
    /// sequential case.
    pub async fn run(&self) -> Result<(IngestionBatch, RunSummary), PipelineError> {
        let entities = self.ranking.fetch_top_n(self.top_n).await?;
        if entities.is_empty() {
            return Err(SourceError::NoEntities.into());
        }
        info!(
            event = "entities_ranked",
            count = entities.len(),
            top_n = self.top_n,
            "ranked entities"
        );

        let mut summary = RunSummary {
            entities_ranked: entities.len(),
            ..Default::default()
        };
        let mut records = Vec::new();

        // Owned entities keep the mapped closure free of a higher-ranked lifetime, which would
        // otherwise make the run future non-Send.
        let fetcher = &self.fetcher;
        let mut results = stream::iter(entities)
            .map(move |entity| async move { fetcher.fetch_reviews(&entity).await }.boxed())
            .buffered(self.entity_concurrency);

        while let Some(entity_reviews) = results.next().await {
            summary.entities_attempted += 1;
            let report = &entity_reviews.report;
            if report.stop_reason.is_abort() {
                summary.entities_aborted += 1;
                if let Some(metrics) = INGEST_METRICS.get() {
                    metrics.entities_aborted.inc();
                }
                warn!(
                    event = "entity_aborted",
                    app_id = report.entity_id,
                    partial_records = report.records,
                    "entity contributed partial results"
                );
            }
            if entity_reviews.records.is_empty() {
                summary.entities_empty += 1;
            }
            records.extend(entity_reviews.records);
        }

        summary.records_fetched = records.len();
        if let Some(metrics) = INGEST_METRICS.get() {
            metrics.reviews_fetched.inc_by(records.len() as u64);
        }

        let (records, dropped) = self.dedup.apply(records);
        summary.duplicates_dropped = dropped;

        info!(
            event = "batch_assembled",
            entities = summary.entities_attempted,
            aborted = summary.entities_aborted,
            records = records.len(),
            duplicates_dropped = dropped,
            "assembled batch"
        );
        Ok((IngestionBatch { records }, summary))
    }
}

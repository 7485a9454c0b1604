use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{info, warn};

use super::{
    PageRequest, RankedEntity, RawReviewRecord, ReviewPage, ReviewPageSource, ENTITY_ID_FIELD,
    ENTITY_NAME_FIELD,
};
use crate::http_client::{run_with_retry, FetchErrorKind, HttpError, RetryPolicy, SourceClient};
use crate::server::monitoring::INGEST_METRICS;

/// Steam store reviews client (`/appreviews/{appid}`, recent reviews).
pub struct SteamReviewsClient {
    http: SourceClient,
    api_url: String,
    language: String,
}

impl SteamReviewsClient {
    pub fn new(http: SourceClient, api_url: String, language: String) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            language,
        }
    }
}

impl ReviewPageSource for SteamReviewsClient {
    fn fetch_page<'a>(
        &'a self,
        request: PageRequest<'a>,
    ) -> BoxFuture<'a, Result<ReviewPage, HttpError>> {
        Box::pin(async move {
            let url = format!("{}/{}", self.api_url, request.entity_id);
            let page_size = request.page_size.to_string();
            let mut query = vec![
                ("json", "1"),
                ("language", self.language.as_str()),
                ("filter", "recent"),
                ("num_per_page", page_size.as_str()),
            ];
            if let Some(cursor) = request.cursor {
                query.push(("cursor", cursor));
            }

            let resource = format!("reviews for app {}", request.entity_id);
            self.http.get_json(&resource, &url, &query).await
        })
    }
}

/// Bounds for walking one entity's review pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationSettings {
    pub page_size: u32,
    /// Hard ceiling on requests per entity, whatever the cursor says.
    pub max_pages: u32,
    /// Pause between successful pages. Not applied after the last one.
    pub inter_page_delay: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 5,
            inter_page_delay: Duration::from_millis(200),
            retry_policy: RetryPolicy::no_retry(),
        }
    }
}

/// Why pagination for an entity stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EmptyPage,
    CursorExhausted,
    CursorRepeated,
    PageLimit,
    Aborted {
        kind: FetchErrorKind,
        message: String,
    },
}

impl StopReason {
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyPage => "empty_page",
            Self::CursorExhausted => "cursor_exhausted",
            Self::CursorRepeated => "cursor_repeated",
            Self::PageLimit => "page_limit",
            Self::Aborted { .. } => "aborted",
        }
    }
}

/// Per-entity bookkeeping. Logged and counted, never returned to the trigger caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFetchReport {
    pub entity_id: i64,
    pub pages_fetched: u32,
    pub records: usize,
    pub skipped_entries: usize,
    pub stop_reason: StopReason,
}

/// Everything collected for one entity, partial results included.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReviews {
    pub records: Vec<RawReviewRecord>,
    pub report: EntityFetchReport,
}

/// Cursor-driven review walker for a single entity.
///
/// It never fails: a request that times out, cannot connect, returns a non-2xx status or an
/// undecodable body ends pagination for that entity only, and whatever was collected before
/// the failure is returned.
pub struct PaginatedReviewFetcher<S>
where
    S: ReviewPageSource,
{
    source: S,
    settings: PaginationSettings,
}

impl<S> PaginatedReviewFetcher<S>
where
    S: ReviewPageSource,
{
    pub fn new(source: S, settings: PaginationSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> &PaginationSettings {
        &self.settings
    }

    pub async fn fetch_reviews(&self, entity: &RankedEntity) -> EntityReviews {
        let settings = &self.settings;
        let mut records: Vec<RawReviewRecord> = Vec::new();
        let mut skipped_entries = 0usize;
        let mut cursor: Option<String> = None;
        let mut pages_fetched = 0u32;

        let stop_reason = loop {
            if pages_fetched >= settings.max_pages {
                break StopReason::PageLimit;
            }

            let request = PageRequest {
                entity_id: entity.id,
                cursor: cursor.as_deref(),
                page_size: settings.page_size,
            };
            let page = match run_with_retry(
                &settings.retry_policy,
                entity.id,
                |_| self.source.fetch_page(request),
                |err| err.is_retryable(),
            )
            .await
            {
                Ok((page, _attempts)) => page,
                Err(terminal) => {
                    warn!(
                        event = "review_page_aborted",
                        app_id = entity.id,
                        name = %entity.name,
                        page = pages_fetched + 1,
                        attempts = terminal.attempts,
                        failure_kind = terminal.error.kind().as_str(),
                        error = %terminal.error,
                        "stopping pagination for entity"
                    );
                    break StopReason::Aborted {
                        kind: terminal.error.kind(),
                        message: terminal.error.to_string(),
                    };
                }
            };
            pages_fetched += 1;
            if let Some(metrics) = INGEST_METRICS.get() {
                metrics.pages_fetched.inc();
            }

            if page.reviews.is_empty() {
                break StopReason::EmptyPage;
            }

            let page_len = page.reviews.len();
            for review in page.reviews {
                match tag_review(review, entity) {
                    Some(record) => records.push(record),
                    None => skipped_entries += 1,
                }
            }
            info!(
                event = "review_page_fetched",
                app_id = entity.id,
                page = pages_fetched,
                max_pages = settings.max_pages,
                reviews = page_len,
                "fetched review page"
            );

            let next = match page.cursor.filter(|next| !next.is_empty()) {
                Some(next) => next,
                None => break StopReason::CursorExhausted,
            };
            if cursor.as_deref() == Some(next.as_str()) {
                break StopReason::CursorRepeated;
            }
            if pages_fetched >= settings.max_pages {
                break StopReason::PageLimit;
            }

            cursor = Some(next);
            if !settings.inter_page_delay.is_zero() {
                tokio::time::sleep(settings.inter_page_delay).await;
            }
        };

        let report = EntityFetchReport {
            entity_id: entity.id,
            pages_fetched,
            records: records.len(),
            skipped_entries,
            stop_reason,
        };
        info!(
            event = "entity_reviews_fetched",
            app_id = entity.id,
            name = %entity.name,
            pages = report.pages_fetched,
            records = report.records,
            skipped_entries = report.skipped_entries,
            stop_reason = report.stop_reason.as_str(),
            "finished entity"
        );

        EntityReviews { records, report }
    }
}

fn tag_review(review: Value, entity: &RankedEntity) -> Option<RawReviewRecord> {
    let Value::Object(mut record) = review else {
        return None;
    };
    record.insert(ENTITY_ID_FIELD.to_string(), Value::from(entity.id));
    record.insert(
        ENTITY_NAME_FIELD.to_string(),
        Value::String(entity.name.clone()),
    );
    Some(record)
}

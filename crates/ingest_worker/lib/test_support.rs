use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use object_store::path::Path;
use object_store::ObjectStore;
use serde_json::{json, Value};

use crate::http_client::HttpError;
use crate::sources::{
    PageRequest, RankedEntity, RankingSource, RawReviewRecord, ReviewPage, ReviewPageSource,
    SourceError,
};
use crate::warehouse::api::{
    JobErrorDetail, JobReference, JobResource, JobStatistics, JobStatus, LoadJobSpec,
    LoadStatistics, TableRef, WarehouseApi,
};
use crate::warehouse::TableSchema;

/// A review as the upstream API shapes it, plus one field the warehouse schema lacks.
pub(crate) fn review(id: &str) -> Value {
    json!({
        "recommendationid": id,
        "author": {
            "steamid": "76561198000000000",
            "num_games_owned": 12,
            "num_reviews": 3,
            "playtime_forever": 600,
            "playtime_last_two_weeks": 0,
            "playtime_at_review": 540,
            "last_played": 1_700_000_000
        },
        "language": "english",
        "review": format!("review {id}"),
        "timestamp_created": 1_700_000_000,
        "timestamp_updated": 1_700_000_100,
        "voted_up": true,
        "votes_up": 4,
        "votes_funny": 0,
        "weighted_vote_score": "0.52",
        "comment_count": 0,
        "steam_purchase": true,
        "received_for_free": false,
        "written_during_early_access": false,
        "steam_deck_review": false,
        "unexpected_upstream_field": "kept"
    })
}

/// A tagged record ready for staging.
pub(crate) fn review_record(id: &str, app_id: i64) -> RawReviewRecord {
    let Value::Object(mut record) = review(id) else {
        unreachable!("review fixture is an object");
    };
    record.insert("app_id".to_string(), json!(app_id));
    record.insert("game_name".to_string(), json!(format!("game-{app_id}")));
    record
}

pub(crate) fn page(ids: &[&str], cursor: Option<&str>) -> Result<ReviewPage, HttpError> {
    Ok(ReviewPage {
        reviews: ids.iter().map(|id| review(id)).collect(),
        cursor: cursor.map(str::to_string),
    })
}

pub(crate) fn server_error(status: u16) -> HttpError {
    HttpError::unexpected_status("scripted reviews", status, "scripted failure")
}

pub(crate) fn ranked(id: i64, popularity: i64) -> RankedEntity {
    RankedEntity {
        id,
        name: format!("game-{id}"),
        popularity,
    }
}

pub(crate) struct MockRankingSource {
    outcome: Mutex<Option<Result<Vec<RankedEntity>, SourceError>>>,
    calls: Mutex<u32>,
}

impl MockRankingSource {
    pub(crate) fn returning(entities: Vec<RankedEntity>) -> Self {
        Self {
            outcome: Mutex::new(Some(Ok(entities))),
            calls: Mutex::new(0),
        }
    }

    pub(crate) fn failing(status: u16) -> Self {
        Self {
            outcome: Mutex::new(Some(Err(SourceError::Unavailable(
                HttpError::unexpected_status("top games", status, "scripted failure"),
            )))),
            calls: Mutex::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        *self.calls.lock().expect("calls mutex poisoned")
    }
}

impl RankingSource for MockRankingSource {
    fn fetch_top_n<'a>(
        &'a self,
        n: usize,
    ) -> BoxFuture<'a, Result<Vec<RankedEntity>, SourceError>> {
        Box::pin(async move {
            *self.calls.lock().expect("calls mutex poisoned") += 1;
            let outcome = self
                .outcome
                .lock()
                .expect("outcome mutex poisoned")
                .take()
                .unwrap_or_else(|| Err(SourceError::Malformed("ranking already consumed".into())));
            outcome.map(|mut entities| {
                entities.truncate(n);
                entities
            })
        })
    }
}

#[derive(Default)]
pub(crate) struct MockPageSource {
    plans: Mutex<HashMap<i64, VecDeque<Result<ReviewPage, HttpError>>>>,
    cursors: Mutex<HashMap<i64, Vec<Option<String>>>>,
}

impl MockPageSource {
    pub(crate) fn with_plan(plan: Vec<(i64, Vec<Result<ReviewPage, HttpError>>)>) -> Self {
        let mut plans = HashMap::new();
        for (entity_id, pages) in plan {
            plans.insert(entity_id, pages.into_iter().collect());
        }
        Self {
            plans: Mutex::new(plans),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Cursor sent on each request for `entity_id`, in order.
    pub(crate) fn cursors_for(&self, entity_id: i64) -> Vec<Option<String>> {
        self.cursors
            .lock()
            .expect("cursors mutex poisoned")
            .get(&entity_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl ReviewPageSource for MockPageSource {
    fn fetch_page<'a>(
        &'a self,
        request: PageRequest<'a>,
    ) -> BoxFuture<'a, Result<ReviewPage, HttpError>> {
        Box::pin(async move {
            self.cursors
                .lock()
                .expect("cursors mutex poisoned")
                .entry(request.entity_id)
                .or_default()
                .push(request.cursor.map(str::to_string));

            let mut plans = self.plans.lock().expect("plans mutex poisoned");
            plans
                .get_mut(&request.entity_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Err(HttpError::unexpected_status(
                        "scripted reviews",
                        599,
                        &format!("no scripted page for entity {}", request.entity_id),
                    ))
                })
        })
    }
}

#[derive(Default)]
struct WarehouseState {
    datasets: Vec<(String, String)>,
    tables: HashMap<String, TableSchema>,
    rows: HashMap<String, u64>,
    jobs: HashMap<String, JobResource>,
    datasets_created: u32,
    tables_created: u32,
    next_failure: Option<(JobErrorDetail, Vec<JobErrorDetail>)>,
}

/// Warehouse double. Load jobs read the staged object back from `store` and count its lines.
#[derive(Default)]
pub(crate) struct InMemoryWarehouse {
    state: Mutex<WarehouseState>,
    store: Option<(Arc<dyn ObjectStore>, String)>,
}

impl InMemoryWarehouse {
    pub(crate) fn with_table(table: TableRef, schema: TableSchema) -> Self {
        let warehouse = Self::default();
        {
            let mut state = warehouse.state.lock().expect("state mutex poisoned");
            state
                .datasets
                .push((table.project_id.clone(), table.dataset_id.clone()));
            state.tables.insert(table.path(), schema);
        }
        warehouse
    }

    pub(crate) fn reading_from(store: Arc<dyn ObjectStore>, uri_base: &str) -> Self {
        Self {
            state: Mutex::new(WarehouseState::default()),
            store: Some((store, format!("{}/", uri_base.trim_end_matches('/')))),
        }
    }

    pub(crate) fn fail_next_job(&self, error: JobErrorDetail, errors: Vec<JobErrorDetail>) {
        self.state.lock().expect("state mutex poisoned").next_failure = Some((error, errors));
    }

    pub(crate) fn datasets_created(&self) -> u32 {
        self.state.lock().expect("state mutex poisoned").datasets_created
    }

    pub(crate) fn tables_created(&self) -> u32 {
        self.state.lock().expect("state mutex poisoned").tables_created
    }

    pub(crate) fn table_schema(&self, table: &TableRef) -> Option<TableSchema> {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .tables
            .get(&table.path())
            .cloned()
    }

    pub(crate) fn row_count(&self, table: &TableRef) -> u64 {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .rows
            .get(&table.path())
            .copied()
            .unwrap_or(0)
    }

    async fn staged_line_count(&self, uri: &str) -> Result<u64, String> {
        let (store, base) = self
            .store
            .as_ref()
            .ok_or_else(|| "warehouse has no landing zone attached".to_string())?;
        let path = uri
            .strip_prefix(base.as_str())
            .ok_or_else(|| format!("{uri} is outside {base}"))?;
        let bytes = store
            .get(&Path::from(path))
            .await
            .map_err(|err| err.to_string())?
            .bytes()
            .await
            .map_err(|err| err.to_string())?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.lines().filter(|line| !line.trim().is_empty()).count() as u64)
    }
}

impl WarehouseApi for InMemoryWarehouse {
    fn dataset_exists<'a>(&'a self, table: &'a TableRef) -> BoxFuture<'a, Result<bool, HttpError>> {
        Box::pin(async move {
            let state = self.state.lock().expect("state mutex poisoned");
            Ok(state.datasets.iter().any(|(project, dataset)| {
                *project == table.project_id && *dataset == table.dataset_id
            }))
        })
    }

    fn create_dataset<'a>(
        &'a self,
        table: &'a TableRef,
        _location: &'a str,
    ) -> BoxFuture<'a, Result<(), HttpError>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("state mutex poisoned");
            state
                .datasets
                .push((table.project_id.clone(), table.dataset_id.clone()));
            state.datasets_created += 1;
            Ok(())
        })
    }

    fn get_table_schema<'a>(
        &'a self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, Result<Option<TableSchema>, HttpError>> {
        Box::pin(async move { Ok(self.table_schema(table)) })
    }

    fn create_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
    ) -> BoxFuture<'a, Result<(), HttpError>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("state mutex poisoned");
            state.tables.insert(table.path(), schema.clone());
            state.tables_created += 1;
            Ok(())
        })
    }

    fn insert_load_job<'a>(
        &'a self,
        spec: &'a LoadJobSpec<'a>,
    ) -> BoxFuture<'a, Result<JobResource, HttpError>> {
        Box::pin(async move {
            let staged = self.staged_line_count(spec.source_uri).await;

            let mut state = self.state.lock().expect("state mutex poisoned");
            let job_id = format!("job_{}", state.jobs.len() + 1);
            let job_reference = JobReference {
                project_id: spec.destination.project_id.clone(),
                job_id: job_id.clone(),
                location: Some(spec.location.to_string()),
            };
            let table_key = spec.destination.path();

            let failure = match (state.next_failure.take(), staged) {
                (Some(failure), _) => Some(failure),
                (None, Err(message)) => Some((
                    JobErrorDetail {
                        reason: Some("notFound".to_string()),
                        location: Some(spec.source_uri.to_string()),
                        message,
                    },
                    Vec::new(),
                )),
                (None, Ok(_)) if !state.tables.contains_key(&table_key) => Some((
                    JobErrorDetail {
                        reason: Some("notFound".to_string()),
                        location: None,
                        message: format!("Not found: Table {table_key}"),
                    },
                    Vec::new(),
                )),
                (None, Ok(rows)) => {
                    *state.rows.entry(table_key).or_insert(0) += rows;
                    state.jobs.insert(
                        job_id.clone(),
                        JobResource {
                            job_reference: job_reference.clone(),
                            status: JobStatus {
                                state: "DONE".to_string(),
                                ..Default::default()
                            },
                            statistics: Some(JobStatistics {
                                load: Some(LoadStatistics {
                                    output_rows: Some(rows.to_string()),
                                }),
                            }),
                        },
                    );
                    None
                }
            };
            if let Some((error, errors)) = failure {
                state.jobs.insert(
                    job_id.clone(),
                    JobResource {
                        job_reference: job_reference.clone(),
                        status: JobStatus {
                            state: "DONE".to_string(),
                            error_result: Some(error),
                            errors,
                        },
                        statistics: None,
                    },
                );
            }

            Ok(JobResource {
                job_reference,
                status: JobStatus {
                    state: "RUNNING".to_string(),
                    ..Default::default()
                },
                statistics: None,
            })
        })
    }

    fn get_job<'a>(
        &'a self,
        job: &'a JobReference,
    ) -> BoxFuture<'a, Result<JobResource, HttpError>> {
        Box::pin(async move {
            self.state
                .lock()
                .expect("state mutex poisoned")
                .jobs
                .get(&job.job_id)
                .cloned()
                .ok_or_else(|| HttpError::unexpected_status("bigquery job", 404, &job.job_id))
        })
    }
}

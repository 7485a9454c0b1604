use thiserror::Error;

use super::api::JobErrorDetail;
use super::schema::SchemaDifference;
use crate::http_client::HttpError;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("table {table} does not match the raw reviews schema: {}", join(.differences))]
    SchemaMismatch {
        table: String,
        differences: Vec<SchemaDifference>,
    },
    #[error("load job {job_id} failed: {message}")]
    LoadJobFailed {
        job_id: String,
        message: String,
        errors: Vec<JobErrorDetail>,
    },
    #[error("warehouse call `{operation}` failed")]
    Api {
        operation: &'static str,
        #[source]
        source: HttpError,
    },
}

impl WarehouseError {
    pub(crate) fn api(operation: &'static str) -> impl FnOnce(HttpError) -> Self {
        move |source| Self::Api { operation, source }
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

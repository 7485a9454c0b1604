use std::time::Duration;

use tracing::{info, warn};

use super::api::{JobResource, LoadJobSpec, TableRef, WarehouseApi};
use super::error::WarehouseError;
use super::schema::{schema_differences, TableSchema};
use crate::landing_zone::LandingZoneObject;

/// Creates the destination when absent and appends staged objects to it.
pub struct WarehouseLoader<W> {
    api: W,
    table: TableRef,
    location: String,
    schema: &'static TableSchema,
    poll_interval: Duration,
}

impl<W> WarehouseLoader<W>
where
    W: WarehouseApi,
{
    pub fn new(
        api: W,
        table: TableRef,
        location: impl Into<String>,
        schema: &'static TableSchema,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            table,
            location: location.into(),
            schema,
            poll_interval,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Idempotent: creates the dataset and table only if they are missing.
    ///
    /// An existing table is compared column by column and reported as
    /// [`WarehouseError::SchemaMismatch`] when it drifted. It is never altered.
    pub async fn ensure_schema(&self) -> Result<(), WarehouseError> {
        let dataset_exists = self
            .api
            .dataset_exists(&self.table)
            .await
            .map_err(WarehouseError::api("get dataset"))?;
        if !dataset_exists {
            self.api
                .create_dataset(&self.table, &self.location)
                .await
                .map_err(WarehouseError::api("create dataset"))?;
            info!(
                event = "warehouse_dataset_created",
                project = %self.table.project_id,
                dataset = %self.table.dataset_id,
                location = %self.location,
                "created dataset"
            );
        }

        match self
            .api
            .get_table_schema(&self.table)
            .await
            .map_err(WarehouseError::api("get table"))?
        {
            Some(existing) => {
                let differences = schema_differences(self.schema, &existing);
                if !differences.is_empty() {
                    return Err(WarehouseError::SchemaMismatch {
                        table: self.table.path(),
                        differences,
                    });
                }
            }
            None => {
                self.api
                    .create_table(&self.table, self.schema)
                    .await
                    .map_err(WarehouseError::api("create table"))?;
                info!(
                    event = "warehouse_table_created",
                    table = %self.table.path(),
                    "created table"
                );
            }
        }
        Ok(())
    }

    /// Appends `object` to the table and blocks until the job finishes.
    ///
    /// Returns the job's own output row count, not the number of records staged.
    pub async fn load(&self, object: &LandingZoneObject) -> Result<u64, WarehouseError> {
        let spec = LoadJobSpec {
            source_uri: &object.uri,
            destination: &self.table,
            schema: self.schema,
            location: &self.location,
        };
        let mut job = self
            .api
            .insert_load_job(&spec)
            .await
            .map_err(WarehouseError::api("insert load job"))?;
        info!(
            event = "load_job_started",
            job_id = %job.job_reference.job_id,
            source_uri = %object.uri,
            table = %self.table.path(),
            "started load job"
        );

        while !job.status.is_done() {
            tokio::time::sleep(self.poll_interval).await;
            job = self
                .api
                .get_job(&job.job_reference)
                .await
                .map_err(WarehouseError::api("get load job"))?;
        }

        finish(job, object)
    }
}

fn finish(job: JobResource, object: &LandingZoneObject) -> Result<u64, WarehouseError> {
    let job_id = job.job_reference.job_id.clone();
    if let Some(error) = &job.status.error_result {
        warn!(
            event = "load_job_failed",
            job_id = %job_id,
            error = %error,
            row_errors = job.status.errors.len(),
            "load job failed"
        );
        return Err(WarehouseError::LoadJobFailed {
            job_id,
            message: error.to_string(),
            errors: job.status.errors.clone(),
        });
    }

    let rows = match job.output_rows() {
        Some(rows) => rows,
        None => {
            warn!(
                event = "load_job_missing_row_count",
                job_id = %job_id,
                "load job finished without output row statistics"
            );
            0
        }
    };
    info!(
        event = "load_job_finished",
        job_id = %job_id,
        rows_loaded = rows,
        records_staged = object.record_count,
        "load job finished"
    );
    Ok(rows)
}

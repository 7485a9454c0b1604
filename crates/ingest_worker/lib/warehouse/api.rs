use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::schema::TableSchema;
use crate::http_client::HttpError;

/// `project.dataset.table`, serialized in BigQuery's `tableReference` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(project_id: &str, dataset_id: &str, table_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            dataset_id: dataset_id.to_string(),
            table_id: table_id.to_string(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Append-only newline-delimited JSON load from one landing-zone object.
#[derive(Debug, Clone)]
pub struct LoadJobSpec<'a> {
    pub source_uri: &'a str,
    pub destination: &'a TableRef,
    pub schema: &'a TableSchema,
    pub location: &'a str,
}

impl LoadJobSpec<'_> {
    pub fn to_request_body(&self) -> Value {
        json!({
            "jobReference": {
                "projectId": self.destination.project_id,
                "location": self.location,
            },
            "configuration": {
                "load": {
                    "sourceUris": [self.source_uri],
                    "destinationTable": self.destination,
                    "schema": self.schema,
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": "WRITE_APPEND",
                    "createDisposition": "CREATE_NEVER",
                    "ignoreUnknownValues": true,
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// One entry of a job's `errorResult` / `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrorDetail {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for JobErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.reason, &self.location) {
            (Some(reason), Some(location)) => {
                write!(f, "{reason} at {location}: {}", self.message)
            }
            (Some(reason), None) => write!(f, "{reason}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_result: Option<JobErrorDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<JobErrorDetail>,
}

impl JobStatus {
    pub fn is_done(&self) -> bool {
        self.state.eq_ignore_ascii_case("DONE")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStatistics {
    /// BigQuery encodes int64 values as JSON strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_rows: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatistics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadStatistics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResource {
    pub job_reference: JobReference,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<JobStatistics>,
}

impl JobResource {
    pub fn output_rows(&self) -> Option<u64> {
        self.statistics
            .as_ref()?
            .load
            .as_ref()?
            .output_rows
            .as_deref()?
            .parse()
            .ok()
    }
}

#[derive(Debug, Deserialize)]
struct TableResource {
    #[serde(default)]
    schema: Option<TableSchema>,
}

/// Warehouse control-plane calls used by the loader.
///
/// "Not found" is a value, not an error: `dataset_exists` returns `false` and `get_table_schema`
/// returns `None`.
pub trait WarehouseApi: Send + Sync {
    fn dataset_exists<'a>(&'a self, table: &'a TableRef) -> BoxFuture<'a, Result<bool, HttpError>>;

    fn create_dataset<'a>(
        &'a self,
        table: &'a TableRef,
        location: &'a str,
    ) -> BoxFuture<'a, Result<(), HttpError>>;

    fn get_table_schema<'a>(
        &'a self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, Result<Option<TableSchema>, HttpError>>;

    fn create_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
    ) -> BoxFuture<'a, Result<(), HttpError>>;

    fn insert_load_job<'a>(
        &'a self,
        spec: &'a LoadJobSpec<'a>,
    ) -> BoxFuture<'a, Result<JobResource, HttpError>>;

    fn get_job<'a>(
        &'a self,
        job: &'a JobReference,
    ) -> BoxFuture<'a, Result<JobResource, HttpError>>;
}

impl<T> WarehouseApi for std::sync::Arc<T>
where
    T: WarehouseApi + ?Sized,
{
    fn dataset_exists<'a>(&'a self, table: &'a TableRef) -> BoxFuture<'a, Result<bool, HttpError>> {
        (**self).dataset_exists(table)
    }

    fn create_dataset<'a>(
        &'a self,
        table: &'a TableRef,
        location: &'a str,
    ) -> BoxFuture<'a, Result<(), HttpError>> {
        (**self).create_dataset(table, location)
    }

    fn get_table_schema<'a>(
        &'a self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, Result<Option<TableSchema>, HttpError>> {
        (**self).get_table_schema(table)
    }

    fn create_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
    ) -> BoxFuture<'a, Result<(), HttpError>> {
        (**self).create_table(table, schema)
    }

    fn insert_load_job<'a>(
        &'a self,
        spec: &'a LoadJobSpec<'a>,
    ) -> BoxFuture<'a, Result<JobResource, HttpError>> {
        (**self).insert_load_job(spec)
    }

    fn get_job<'a>(
        &'a self,
        job: &'a JobReference,
    ) -> BoxFuture<'a, Result<JobResource, HttpError>> {
        (**self).get_job(job)
    }
}

/// BigQuery REST v2 over reqwest.
///
/// Authentication is a pre-issued bearer token when one is configured; the emulator and the
/// test servers accept anonymous calls.
#[derive(Clone)]
pub struct BigQueryClient {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl BigQueryClient {
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends and decodes; `Ok(None)` for 404.
    async fn send<T: DeserializeOwned>(
        &self,
        resource: &str,
        builder: RequestBuilder,
    ) -> Result<Option<T>, HttpError> {
        let response = builder
            .send()
            .await
            .map_err(|err| HttpError::from_reqwest(resource, err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| HttpError::from_reqwest(resource, err))?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(HttpError::unexpected_status(resource, status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|source| HttpError::Decode {
                resource: resource.to_string(),
                source,
            })
    }

    /// Creation calls treat 409 as success: someone else created it first.
    async fn create(&self, resource: &str, path: &str, body: Value) -> Result<(), HttpError> {
        let builder = self.request(Method::POST, path).json(&body);
        match self.send::<Value>(resource, builder).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(HttpError::unexpected_status(resource, 404, "")),
            Err(HttpError::UnexpectedStatus { status: 409, .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn required<T>(resource: &str, value: Option<T>) -> Result<T, HttpError> {
        value.ok_or_else(|| HttpError::unexpected_status(resource, 404, ""))
    }
}

impl WarehouseApi for BigQueryClient {
    fn dataset_exists<'a>(&'a self, table: &'a TableRef) -> BoxFuture<'a, Result<bool, HttpError>> {
        Box::pin(async move {
            let path = format!(
                "/projects/{}/datasets/{}",
                table.project_id, table.dataset_id
            );
            let found: Option<Value> = self
                .send("bigquery dataset", self.request(Method::GET, &path))
                .await?;
            Ok(found.is_some())
        })
    }

    fn create_dataset<'a>(
        &'a self,
        table: &'a TableRef,
        location: &'a str,
    ) -> BoxFuture<'a, Result<(), HttpError>> {
        Box::pin(async move {
            let path = format!("/projects/{}/datasets", table.project_id);
            let body = json!({
                "datasetReference": {
                    "projectId": table.project_id,
                    "datasetId": table.dataset_id,
                },
                "location": location,
            });
            self.create("bigquery dataset", &path, body).await
        })
    }

    fn get_table_schema<'a>(
        &'a self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, Result<Option<TableSchema>, HttpError>> {
        Box::pin(async move {
            let path = format!(
                "/projects/{}/datasets/{}/tables/{}",
                table.project_id, table.dataset_id, table.table_id
            );
            let found: Option<TableResource> = self
                .send("bigquery table", self.request(Method::GET, &path))
                .await?;
            Ok(found.map(|resource| resource.schema.unwrap_or_default()))
        })
    }

    fn create_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
    ) -> BoxFuture<'a, Result<(), HttpError>> {
        Box::pin(async move {
            let path = format!(
                "/projects/{}/datasets/{}/tables",
                table.project_id, table.dataset_id
            );
            let body = json!({ "tableReference": table, "schema": schema });
            self.create("bigquery table", &path, body).await
        })
    }

    fn insert_load_job<'a>(
        &'a self,
        spec: &'a LoadJobSpec<'a>,
    ) -> BoxFuture<'a, Result<JobResource, HttpError>> {
        Box::pin(async move {
            let path = format!("/projects/{}/jobs", spec.destination.project_id);
            let builder = self
                .request(Method::POST, &path)
                .json(&spec.to_request_body());
            let job = self.send("bigquery load job", builder).await?;
            Self::required("bigquery load job", job)
        })
    }

    fn get_job<'a>(
        &'a self,
        job: &'a JobReference,
    ) -> BoxFuture<'a, Result<JobResource, HttpError>> {
        Box::pin(async move {
            let path = format!("/projects/{}/jobs/{}", job.project_id, job.job_id);
            let mut builder = self.request(Method::GET, &path);
            if let Some(location) = &job.location {
                builder = builder.query(&[("location", location.as_str())]);
            }
            let found = self.send("bigquery job", builder).await?;
            Self::required("bigquery job", found)
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{JobResource, LoadJobSpec, TableRef};
    use crate::warehouse::schema::raw_reviews_schema;

    #[test]
    fn load_job_body_is_append_only_and_tolerant() {
        let table = TableRef::new("proj", "steam_reviews", "raw_reviews");
        let spec = LoadJobSpec {
            source_uri: "gs://bucket/raw/2024-01-01/x.jsonl",
            destination: &table,
            schema: raw_reviews_schema(),
            location: "US",
        };

        let body = spec.to_request_body();
        let load = &body["configuration"]["load"];

        assert_eq!(load["writeDisposition"], "WRITE_APPEND");
        assert_eq!(load["sourceFormat"], "NEWLINE_DELIMITED_JSON");
        assert_eq!(load["ignoreUnknownValues"], true);
        assert_eq!(load["destinationTable"]["tableId"], "raw_reviews");
        assert_eq!(load["sourceUris"][0], "gs://bucket/raw/2024-01-01/x.jsonl");
        assert_eq!(load["schema"]["fields"].as_array().map(Vec::len), Some(17));
    }

    #[test]
    fn job_resource_reads_string_encoded_row_count() {
        let job: JobResource = serde_json::from_value(json!({
            "jobReference": {"projectId": "proj", "jobId": "job_1", "location": "US"},
            "status": {"state": "DONE"},
            "statistics": {"load": {"outputRows": "1234", "inputFiles": "1"}}
        }))
        .expect("job parses");

        assert!(job.status.is_done());
        assert_eq!(job.output_rows(), Some(1234));
    }

    #[test]
    fn job_resource_carries_error_details() {
        let job: JobResource = serde_json::from_value(json!({
            "jobReference": {"projectId": "proj", "jobId": "job_2"},
            "status": {
                "state": "DONE",
                "errorResult": {"reason": "invalid", "message": "Error while reading data"},
                "errors": [{"reason": "invalid", "location": "line 3", "message": "bad value"}]
            }
        }))
        .expect("job parses");

        let error = job.status.error_result.as_ref().expect("error result");
        assert_eq!(error.to_string(), "invalid: Error while reading data");
        assert_eq!(job.status.errors[0].to_string(), "invalid at line 3: bad value");
        assert_eq!(job.output_rows(), None);
    }
}

//! Landing zone: one immutable newline-delimited JSON object per run, partitioned by UTC date.

mod error;

pub use error::StagingWriteError;

use std::path::Path as FsPath;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMode, PutOptions, PutPayload,
};
use tracing::info;

use crate::sources::RawReviewRecord;

pub const OBJECT_FILE_STEM: &str = "steam_reviews_raw_";
pub const CONTENT_TYPE: &str = "application/jsonl";

/// Metadata for one staged batch. `uri` is what the warehouse load job reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandingZoneObject {
    pub date_partition: String,
    pub run_timestamp: DateTime<Utc>,
    pub filename: String,
    pub path: String,
    pub uri: String,
    pub record_count: usize,
    pub size_bytes: usize,
}

/// Builds `{prefix}/{YYYY-MM-DD}/steam_reviews_raw_{HHMMSS}{nanos}.jsonl`.
///
/// Returns `(date_partition, filename, path)`. The nanosecond suffix keeps two runs inside the
/// same second from landing on the same name.
pub fn object_path(prefix: &str, run_timestamp: DateTime<Utc>) -> (String, String, String) {
    let date_partition = run_timestamp.format("%Y-%m-%d").to_string();
    let filename = format!(
        "{OBJECT_FILE_STEM}{}.jsonl",
        run_timestamp.format("%H%M%S%9f")
    );
    let prefix = prefix.trim_matches('/');
    let path = if prefix.is_empty() {
        format!("{date_partition}/{filename}")
    } else {
        format!("{prefix}/{date_partition}/{filename}")
    };
    (date_partition, filename, path)
}

/// Serializes records one per line, in batch order, without a trailing newline.
pub fn encode_jsonl(records: &[RawReviewRecord]) -> Result<Vec<u8>, StagingWriteError> {
    let mut buffer = Vec::new();
    for (index, record) in records.iter().enumerate() {
        if index > 0 {
            buffer.push(b'\n');
        }
        serde_json::to_writer(&mut buffer, record)
            .map_err(|source| StagingWriteError::Serialize { index, source })?;
    }
    Ok(buffer)
}

pub struct LandingZoneWriter {
    store: Arc<dyn ObjectStore>,
    /// Scheme and authority prepended to object paths when building the load URI.
    uri_base: String,
    prefix: String,
    supports_attributes: bool,
}

impl LandingZoneWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        uri_base: impl Into<String>,
        prefix: impl Into<String>,
        supports_attributes: bool,
    ) -> Self {
        Self {
            store,
            uri_base: uri_base.into().trim_end_matches('/').to_string(),
            prefix: prefix.into().trim_matches('/').to_string(),
            supports_attributes,
        }
    }

    /// Google Cloud Storage, credentials resolved from the environment.
    pub fn gcs(bucket: &str, prefix: &str) -> Result<Self, StagingWriteError> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|source| StagingWriteError::Backend {
                location: format!("gs://{bucket}"),
                source,
            })?;
        Ok(Self::new(
            Arc::new(store),
            format!("gs://{bucket}"),
            prefix,
            true,
        ))
    }

    /// Local directory backend for development runs. The directory is created if missing.
    pub fn local(root: &FsPath, prefix: &str) -> Result<Self, StagingWriteError> {
        std::fs::create_dir_all(root).map_err(|source| StagingWriteError::LocalRoot {
            path: root.display().to_string(),
            source,
        })?;
        let root = root
            .canonicalize()
            .map_err(|source| StagingWriteError::LocalRoot {
                path: root.display().to_string(),
                source,
            })?;
        let store =
            LocalFileSystem::new_with_prefix(&root).map_err(|source| StagingWriteError::Backend {
                location: root.display().to_string(),
                source,
            })?;
        Ok(Self::new(
            Arc::new(store),
            format!("file://{}", root.display()),
            prefix,
            false,
        ))
    }

    pub fn in_memory(bucket: &str, prefix: &str) -> Self {
        Self::new(
            Arc::new(InMemory::new()),
            format!("memory://{bucket}"),
            prefix,
            false,
        )
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Writes the batch as a single object in one put.
    ///
    /// The put uses create-only semantics, so an existing object at the same path is never
    /// overwritten and a collision surfaces as [`StagingWriteError::AlreadyExists`].
    pub async fn write(
        &self,
        records: &[RawReviewRecord],
        run_timestamp: DateTime<Utc>,
    ) -> Result<LandingZoneObject, StagingWriteError> {
        let (date_partition, filename, path) = object_path(&self.prefix, run_timestamp);
        let body = encode_jsonl(records)?;
        let size_bytes = body.len();

        let mut opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        if self.supports_attributes {
            opts.attributes = Attributes::from_iter([(
                Attribute::ContentType,
                AttributeValue::from(CONTENT_TYPE),
            )]);
        }

        let location = Path::from(path.as_str());
        self.store
            .put_opts(&location, PutPayload::from(Bytes::from(body)), opts)
            .await
            .map_err(|source| StagingWriteError::from_put(&path, source))?;

        let uri = format!("{}/{}", self.uri_base, path);
        info!(
            event = "landing_zone_object_written",
            uri = %uri,
            records = records.len(),
            size_bytes,
            "staged batch"
        );

        Ok(LandingZoneObject {
            date_partition,
            run_timestamp,
            filename,
            path,
            uri,
            record_count: records.len(),
            size_bytes,
        })
    }
}

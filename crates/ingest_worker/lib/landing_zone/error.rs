use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagingWriteError {
    #[error("failed to serialize record {index} for the landing zone")]
    Serialize {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("landing zone object {path} already exists")]
    AlreadyExists { path: String },
    #[error("failed to write landing zone object {path}")]
    Store {
        path: String,
        #[source]
        source: object_store::Error,
    },
    #[error("failed to open landing zone backend {location}")]
    Backend {
        location: String,
        #[source]
        source: object_store::Error,
    },
    #[error("failed to create local landing zone root {path}")]
    LocalRoot {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StagingWriteError {
    pub(crate) fn from_put(path: &str, source: object_store::Error) -> Self {
        match source {
            object_store::Error::AlreadyExists { .. } => Self::AlreadyExists {
                path: path.to_string(),
            },
            source => Self::Store {
                path: path.to_string(),
                source,
            },
        }
    }
}

use thiserror::Error;

use crate::landing_zone::StagingWriteError;
use crate::sources::SourceError;
use crate::warehouse::WarehouseError;

/// Run-level failures. Per-entity fetch failures never reach this type.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),
    #[error(transparent)]
    StagingWrite(#[from] StagingWriteError),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

impl PipelineError {
    /// Short stage label for metrics and logs.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "ranking",
            Self::StagingWrite(_) => "staging",
            Self::Warehouse(WarehouseError::SchemaMismatch { .. }) => "schema",
            Self::Warehouse(WarehouseError::LoadJobFailed { .. }) => "load",
            Self::Warehouse(WarehouseError::Api { .. }) => "warehouse",
        }
    }
}

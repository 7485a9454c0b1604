//! Fixed-schema, append-only destination table and the loader that feeds it.

pub mod api;
mod error;
mod loader;
pub mod schema;

pub use api::{BigQueryClient, JobErrorDetail, TableRef, WarehouseApi};
pub use error::WarehouseError;
pub use loader::WarehouseLoader;
pub use schema::{raw_reviews_schema, SchemaDifference, TableSchema};

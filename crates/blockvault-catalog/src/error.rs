//! Catalog Error Types
//!
//! All catalog operations return `Result<T>` aliased to
//! `Result<T, CatalogError>` so callers can propagate with `?`. Database
//! and serialization failures convert automatically via `#[from]`.

use blockvault_core::JobId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Code(#[from] blockvault_core::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),
}

impl From<sqlx::migrate::MigrateError> for CatalogError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        CatalogError::Migration(e.to_string())
    }
}

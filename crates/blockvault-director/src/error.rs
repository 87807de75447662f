//! Director Error Types
//!
//! The error taxonomy of a virtual backup: configuration errors, catalog
//! inconsistencies, empty consolidations and storage-worker failures are all
//! fatal to the job; they are distinct variants so the caller can report
//! them precisely. Deleted-file replication failures never appear here —
//! they are downgraded to warnings in cleanup.

use blockvault_core::{JobId, JobStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DirectorError>;

#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] blockvault_catalog::CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not get or create a FileSet record")]
    NoFileSet,

    #[error("Could not get or create a Pool record for {0}")]
    NoPool(String),

    #[error("No Next Pool specification found")]
    NoNextPool,

    #[error("Duplicate job not allowed: {0} is already running")]
    DuplicateJob(String),

    #[error("No storage for reading given")]
    NoReadStorage,

    #[error("No storage for writing given")]
    NoWriteStorage,

    #[error("No previous Jobs found")]
    NoPreviousJobs,

    #[error("Jobs missing from catalog: {0:?}")]
    JobsMissing(Vec<JobId>),

    #[error("Files purged from catalog for jobs: {0:?}")]
    JobsPurged(Vec<JobId>),

    #[error("Could not create bootstrap file: no files to consolidate")]
    EmptyBootstrap,

    #[error("Job {0} not found in catalog")]
    JobNotFound(JobId),

    #[error("Storage worker error: {0}")]
    Worker(String),

    #[error("Storage worker terminated with status {0}")]
    WorkerFailed(JobStatus),
}

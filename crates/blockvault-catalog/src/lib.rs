//! BlockVault Catalog Adapter
//!
//! A narrow contract over the backup catalog: jobs, file versions, pools and
//! volume usage. The director consumes this trait; the shipped backend is
//! SQLite ([`SqliteCatalog`]), and the interface is transport-agnostic so a
//! different SQL engine can slot in behind it.
//!
//! ## Row callbacks
//!
//! The accurate file-list query can return millions of rows, so
//! [`CatalogStore::get_file_list`] delivers them through a callback, one call
//! per row with the declared columns, in `job_id`-ascending order. Returning
//! `false` from the callback stops iteration early.
//!
//! ## Thread safety
//!
//! Implementations are `Send + Sync` and shared as `Arc<dyn CatalogStore>`;
//! the SQLite backend's connection pool handles concurrent jobs, including
//! the dedicated batch use of the file-list query.

pub mod error;
pub mod store;
pub mod types;

pub use error::{CatalogError, Result};
pub use store::SqliteCatalog;
pub use types::*;

use async_trait::async_trait;
use blockvault_core::JobId;
use std::collections::HashMap;

/// Called once per file-list row; return `false` to stop iteration.
pub type FileListHandler<'a> = dyn FnMut(FileListRow) -> bool + Send + 'a;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    // ---- resource records ----

    async fn get_or_create_client(&self, name: &str) -> Result<i64>;

    async fn get_or_create_fileset(&self, name: &str) -> Result<i64>;

    /// Materialize a pool row, creating it empty when missing.
    async fn get_or_create_pool(&self, name: &str) -> Result<PoolRecord>;

    async fn get_pool(&self, name: &str) -> Result<Option<PoolRecord>>;

    /// Rewrite a pool's next-pool link and storage list.
    async fn update_pool(&self, pool: &PoolRecord) -> Result<()>;

    // ---- job rows ----

    /// Insert a job row; assigns `job.job_id`.
    async fn create_job(&self, job: &mut JobRecord) -> Result<()>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>>;

    /// Update the mutable start-of-job columns (level, pool, status, start
    /// time, tdate).
    async fn update_job_start(&self, job: &JobRecord) -> Result<()>;

    /// Update the end-of-job columns (status, end time, counters).
    async fn update_job_end(&self, job: &JobRecord) -> Result<()>;

    /// Overwrite a job's StartTime/EndTime/JobTDate. Virtual backups use
    /// this to take over the last consolidated job's times so the next
    /// incremental picks the right reference point.
    async fn update_job_times(
        &self,
        job_id: JobId,
        start_time: i64,
        end_time: i64,
        job_tdate: i64,
    ) -> Result<()>;

    /// Number of running jobs with this name, excluding `exclude`.
    async fn count_running_jobs(&self, name: &str, exclude: JobId) -> Result<u64>;

    // ---- consolidation queries ----

    /// The accurate-restore chain for a client/fileset: the newest
    /// successful Full, the newest Differential after it, and every
    /// Incremental after that, ascending by start time. Empty when no Full
    /// exists.
    async fn accurate_get_jobids(&self, client_id: i64, fileset_id: i64) -> Result<Vec<JobId>>;

    /// Fetch `(job_id, type, client, fileset, purged_files)` for every
    /// listed job that exists.
    async fn check_consistency(&self, jobids: &[JobId]) -> Result<Vec<JobConsistencyRow>>;

    /// Stream the file versions of the listed jobs, ordered by `job_id`
    /// ascending. `use_md5` selects whether digests are fetched alongside
    /// (the rows delivered here never include them); delta sequences are not
    /// supported by this backend and `use_delta` is accepted for contract
    /// compatibility.
    async fn get_file_list(
        &self,
        jobids: &[JobId],
        use_md5: bool,
        use_delta: bool,
        handler: &mut FileListHandler<'_>,
    ) -> Result<()>;

    /// Bulk-insert file rows under a job. Returns the number inserted.
    async fn batch_insert_files(&self, job_id: JobId, rows: &[NewFileRow]) -> Result<u64>;

    /// Re-insert the most recent deleted-file markers (`file_index = 0`)
    /// from the source jobs under `new_job_id`. Returns the number of rows
    /// created.
    async fn replicate_deleted_files(&self, source_jobids: &[JobId], new_job_id: JobId)
        -> Result<u64>;

    // ---- media ----

    /// Record that a job wrote the given volume.
    async fn add_job_media(
        &self,
        job_id: JobId,
        volume_name: &str,
        first_index: i32,
        last_index: i32,
    ) -> Result<()>;

    /// Volume names used by each of the listed jobs.
    async fn volumes_for_jobs(&self, jobids: &[JobId]) -> Result<HashMap<JobId, Vec<String>>>;

    // ---- retention ----

    /// Drop the listed jobs' file rows and mark their files purged, keeping
    /// the job rows.
    async fn purge_files(&self, jobids: &[JobId]) -> Result<()>;

    /// Remove the listed jobs from the catalog entirely.
    async fn purge_jobs(&self, jobids: &[JobId]) -> Result<()>;
}

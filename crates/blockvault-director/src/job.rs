//! Per-Job State and Policy
//!
//! [`JobContext`] is the running state of one virtual backup: the catalog
//! job row, resolved pools and storage lists, the consolidation input, and
//! the counters reported back by the storage worker. [`JobConfig`] is the
//! policy side, the analog of the job's resource definition.

use blockvault_catalog::{JobRecord, PoolRecord};
use blockvault_core::{JobId, JobStatus};
use std::path::PathBuf;
use std::time::Duration;

/// Static job policy.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Whether a second running job with the same name is allowed.
    pub allow_duplicate_jobs: bool,
    /// Pool override from the run directive.
    pub run_pool_override: Option<String>,
    /// NextPool override from the run directive. Highest precedence.
    pub run_next_pool_override: Option<String>,
    /// NextPool from the job definition. Beats the pool's own NextPool.
    pub job_next_pool: Option<String>,
    /// Always-incremental consolidation keeps the catalog pruned.
    pub always_incremental: bool,
    /// Retention window (seconds) for always-incremental; purging of the
    /// consolidated jobs only happens when this is set.
    pub always_incremental_job_retention: Option<i64>,
    /// Where bootstrap files are written.
    pub working_directory: PathBuf,
    /// Timeout for the storage worker connection.
    pub worker_connect_timeout: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            allow_duplicate_jobs: true,
            run_pool_override: None,
            run_next_pool_override: None,
            job_next_pool: None,
            always_incremental: false,
            always_incremental_job_retention: None,
            working_directory: PathBuf::from("."),
            worker_connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters the storage worker reports at termination.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerCounters {
    pub job_files: u64,
    pub job_bytes: u64,
    pub read_bytes: u64,
    pub job_errors: u64,
}

/// Running state of one virtual backup job.
#[derive(Debug)]
pub struct JobContext {
    /// The catalog row of this job; created before the job starts.
    pub job: JobRecord,
    pub client_name: String,
    pub fileset_name: String,
    /// The configured pool; reads come from here.
    pub pool_name: String,
    /// Whether the source jobs were taken accurately.
    pub accurate: bool,
    pub status: JobStatus,
    pub config: JobConfig,

    /// Consolidation set supplied by the caller, when any. Overrides the
    /// accurate-chain query and enables deleted-file replication.
    pub supplied_jobids: Option<Vec<JobId>>,

    // Resolved during init.
    pub read_pool: Option<PoolRecord>,
    pub write_pool: Option<PoolRecord>,
    pub pool_source: String,
    pub read_storage: Vec<String>,
    pub write_storage: Vec<String>,

    // Resolved during run.
    pub previous_job: Option<JobRecord>,
    pub expected_files: u64,
    pub counters: WorkerCounters,
}

impl JobContext {
    pub fn new(
        job: JobRecord,
        client_name: &str,
        fileset_name: &str,
        pool_name: &str,
        config: JobConfig,
    ) -> Self {
        Self {
            job,
            client_name: client_name.to_string(),
            fileset_name: fileset_name.to_string(),
            pool_name: pool_name.to_string(),
            accurate: true,
            status: JobStatus::Created,
            config,
            supplied_jobids: None,
            read_pool: None,
            write_pool: None,
            pool_source: "Job Pool resource".to_string(),
            read_storage: Vec::new(),
            write_storage: Vec::new(),
            previous_job: None,
            expected_files: 0,
            counters: WorkerCounters::default(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job.job_id
    }
}

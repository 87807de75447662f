//! Catalog Row Types
//!
//! Typed forms of the catalog rows the director works with. Times are epoch
//! seconds as `i64`; level and status travel as their single-character codes
//! inside the database and as enums here.

use blockvault_core::{JobId, JobLevel, JobStatus};
use serde::{Deserialize, Serialize};

/// One row of the jobs table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub name: String,
    /// Job type code; backups are `B`.
    pub job_type: char,
    pub level: JobLevel,
    pub status: JobStatus,
    pub client_id: i64,
    pub fileset_id: i64,
    pub pool_id: Option<i64>,
    pub sched_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub job_tdate: i64,
    pub job_files: i64,
    pub job_bytes: i64,
    pub read_bytes: i64,
    pub job_errors: i64,
    pub purged_files: i64,
}

impl JobRecord {
    /// A fresh backup-type job record, not yet inserted.
    pub fn new_backup(name: &str, level: JobLevel, client_id: i64, fileset_id: i64) -> Self {
        Self {
            job_id: 0,
            name: name.to_string(),
            job_type: 'B',
            level,
            status: JobStatus::Created,
            client_id,
            fileset_id,
            pool_id: None,
            sched_time: 0,
            start_time: 0,
            end_time: 0,
            job_tdate: 0,
            job_files: 0,
            job_bytes: 0,
            read_bytes: 0,
            job_errors: 0,
            purged_files: 0,
        }
    }
}

/// One row of the pools table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub pool_id: i64,
    pub name: String,
    /// Name of the pool consolidation writes into, when configured.
    pub next_pool: Option<String>,
    /// Storage resource names attached to this pool.
    pub storage: Vec<String>,
}

/// Result row of the consolidation consistency probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConsistencyRow {
    pub job_id: JobId,
    pub job_type: char,
    pub client_id: i64,
    pub fileset_id: i64,
    pub purged_files: i64,
}

/// One row of the accurate file-list query. Rows arrive ordered by `job_id`
/// ascending so that the newest version of a path wins a last-writer-wins
/// merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListRow {
    pub path: String,
    pub name: String,
    pub file_index: i32,
    pub job_id: JobId,
    pub lstat: String,
}

/// A file row to insert under a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRow {
    pub file_index: i32,
    pub path: String,
    pub name: String,
    pub lstat: String,
    pub md5: String,
}

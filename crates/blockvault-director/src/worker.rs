//! Storage Worker Protocol
//!
//! The director never touches volumes itself; a storage worker does the
//! rewriting. The protocol is small: connect, start a job with the read and
//! write storage lists plus the bootstrap, send the literal `run`, then wait
//! for termination status and counters. This trait is the seam the director
//! drives; tests script it with a mock.

use crate::error::Result;
use async_trait::async_trait;
use blockvault_catalog::NewFileRow;
use blockvault_core::JobStatus;
use std::time::Duration;

/// Termination report from the storage worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerTermination {
    /// Final worker-side job status.
    pub status: Option<JobStatus>,
    pub job_files: u64,
    pub job_bytes: u64,
    pub read_bytes: u64,
    pub job_errors: u64,
    /// File attribute rows collected while the job ran, to be batch-written
    /// into the catalog under the new job.
    pub file_records: Vec<NewFileRow>,
}

impl WorkerTermination {
    pub fn status(&self) -> JobStatus {
        self.status.unwrap_or(JobStatus::ErrorTerminated)
    }
}

#[async_trait]
pub trait StorageWorker: Send {
    /// Establish the worker connection.
    async fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// Start a worker-side job with the storage lists and the bootstrap.
    async fn start_job(
        &mut self,
        read_storage: &[String],
        write_storage: &[String],
        bootstrap: &str,
    ) -> Result<()>;

    /// Kick off execution; the wire command is the text `run`.
    async fn run(&mut self) -> Result<()>;

    /// Block until the worker reports termination.
    async fn wait_for_termination(&mut self) -> Result<WorkerTermination>;

    /// Ask a live worker to abort; used on cancellation and fatal errors.
    async fn signal_terminate(&mut self) -> Result<()>;
}

//! Virtual Backup (Synthetic Full) Orchestration
//!
//! A virtual backup consolidates a chain of prior jobs into one new job
//! without reading the client again. The work here:
//!
//! 1. Create and finalize catalog records for the new job.
//! 2. Figure out which prior jobs to merge and validate them.
//! 3. Build a restore bootstrap selecting the newest version of every file.
//! 4. Drive the storage worker that rewrites those records.
//! 5. Finalize the catalog so the synthetic job stands in for the chain.
//!
//! Two properties are load-bearing and deliberate:
//!
//! - The synthetic job's level becomes the *first* consolidated job's level,
//!   so the result is classified like the backup it replaces.
//! - The synthetic job's StartTime/EndTime/JobTDate are overwritten with the
//!   *last* consolidated job's times. The next incremental diffs against
//!   those times; keeping the real wall-clock times would silently re-backup
//!   nothing and skip everything changed during consolidation.

use crate::bootstrap::RestoreBootstrap;
use crate::error::{DirectorError, Result};
use crate::job::{JobContext, WorkerCounters};
use crate::worker::StorageWorker;
use blockvault_catalog::CatalogStore;
use blockvault_core::{JobId, JobLevel, JobStatus};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// One virtual backup job from init through cleanup.
pub struct VirtualBackupJob {
    catalog: Arc<dyn CatalogStore>,
    ctx: JobContext,
    bootstrap_text: Option<String>,
    finalized: bool,
}

impl VirtualBackupJob {
    pub fn new(catalog: Arc<dyn CatalogStore>, ctx: JobContext) -> Self {
        Self {
            catalog,
            ctx,
            bootstrap_text: None,
            finalized: false,
        }
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    pub fn into_context(self) -> JobContext {
        self.ctx
    }

    /// Job-specific setup before the job runs: resource records, pool
    /// resolution and the initial job-start row.
    pub async fn init(&mut self) -> Result<()> {
        let fileset_id = match self
            .catalog
            .get_or_create_fileset(&self.ctx.fileset_name)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(job_id = self.ctx.job_id(), error = %e, "no FileSet record");
                return Err(DirectorError::NoFileSet);
            }
        };
        self.ctx.job.fileset_id = fileset_id;
        self.ctx.job.client_id = self
            .catalog
            .get_or_create_client(&self.ctx.client_name)
            .await?;

        if let Some(pool) = self.ctx.config.run_pool_override.clone() {
            self.ctx.pool_name = pool;
            self.ctx.pool_source = "Run Pool override".to_string();
        }

        if !self.ctx.config.allow_duplicate_jobs {
            let running = self
                .catalog
                .count_running_jobs(&self.ctx.job.name, self.ctx.job_id())
                .await?;
            if running > 0 {
                return Err(DirectorError::DuplicateJob(self.ctx.job.name.clone()));
            }
        }

        // The configured pool is the read pool; the job's row is re-pointed
        // at the write pool below once it resolves.
        let read_pool = self
            .catalog
            .get_or_create_pool(&self.ctx.pool_name)
            .await
            .map_err(|e| {
                error!(job_id = self.ctx.job_id(), error = %e, "no Pool record");
                DirectorError::NoPool(self.ctx.pool_name.clone())
            })?;
        self.ctx.job.pool_id = Some(read_pool.pool_id);
        self.ctx.read_storage = read_pool.storage.clone();
        debug!(
            read_pool = %read_pool.name,
            source = %self.ctx.pool_source,
            "read pool resolved"
        );

        let (next_pool_name, storage_source) =
            if let Some(name) = self.ctx.config.run_next_pool_override.clone() {
                (name, "Run NextPool override")
            } else if let Some(name) = self.ctx.config.job_next_pool.clone() {
                (name, "Job's NextPool resource")
            } else if let Some(name) = read_pool.next_pool.clone() {
                (name, "Job Pool's NextPool resource")
            } else {
                return Err(DirectorError::NoNextPool);
            };

        let write_pool = self
            .catalog
            .get_or_create_pool(&next_pool_name)
            .await
            .map_err(|_| DirectorError::NoPool(next_pool_name.clone()))?;
        self.ctx.job.pool_id = Some(write_pool.pool_id);
        self.ctx.write_storage = write_pool.storage.clone();
        if self.ctx.write_storage.is_empty() {
            return Err(DirectorError::NoWriteStorage);
        }
        debug!(
            write_pool = %write_pool.name,
            read_pool = %read_pool.name,
            storage_source,
            "write pool resolved"
        );
        self.ctx.read_pool = Some(read_pool);
        self.ctx.write_pool = Some(write_pool);

        let start = now();
        self.ctx.job.start_time = start;
        self.ctx.job.job_tdate = start;
        self.catalog.update_job_start(&self.ctx.job).await?;
        Ok(())
    }

    /// Run the consolidation. The job row is finalized on every path out.
    pub async fn run(&mut self, worker: &mut dyn StorageWorker) -> Result<()> {
        let result = self.do_run(worker).await;
        if result.is_err() && !self.finalized {
            self.ctx.status = JobStatus::FatalError;
            self.ctx.job.status = self.ctx.status;
            self.ctx.job.end_time = now();
            if let Err(e) = self.catalog.update_job_end(&self.ctx.job).await {
                warn!(job_id = self.ctx.job_id(), error = %e, "could not finalize failed job row");
            }
            self.finalized = true;
            self.emit_summary();
        }
        result
    }

    async fn do_run(&mut self, worker: &mut dyn StorageWorker) -> Result<()> {
        if self.ctx.read_storage.is_empty() {
            error!("No storage for reading given");
            return Err(DirectorError::NoReadStorage);
        }
        if self.ctx.write_storage.is_empty() {
            error!("No storage for writing given");
            return Err(DirectorError::NoWriteStorage);
        }

        info!(
            job_id = self.ctx.job_id(),
            job = %self.ctx.job.name,
            "Start Virtual Backup"
        );

        if !self.ctx.accurate {
            warn!("This Job is not an Accurate backup so is not equivalent to a Full backup");
        }

        let jobids = self.resolve_jobids().await?;
        let (Some(&first_id), Some(&last_id)) = (jobids.first(), jobids.last()) else {
            error!("No previous Jobs found");
            return Err(DirectorError::NoPreviousJobs);
        };

        self.check_consistency(&jobids).await?;

        let first = self
            .catalog
            .get_job(first_id)
            .await?
            .ok_or(DirectorError::JobNotFound(first_id))?;
        let first_level = first.level;
        debug!(
            job_id = first_id,
            level = %first_level,
            "level of first consolidated job"
        );

        // The newest consolidated job; its times become ours on finalize so
        // the next incremental picks up everything changed after it.
        let previous = self
            .catalog
            .get_job(last_id)
            .await?
            .ok_or(DirectorError::JobNotFound(last_id))?;
        self.ctx.previous_job = Some(previous);

        let bootstrap = self.create_bootstrap(&jobids).await?;
        info!(
            jobids = ?jobids,
            files = self.ctx.expected_files,
            "Consolidating JobIds"
        );

        self.ctx.status = JobStatus::WaitingStorage;
        debug!("open connection with storage worker");
        worker.connect(self.ctx.config.worker_connect_timeout).await?;
        worker
            .start_job(&self.ctx.read_storage, &self.ctx.write_storage, &bootstrap)
            .await?;

        // Re-stamp the start time after the worker handshake so files
        // created by pre-job hooks are not counted twice: they belong to
        // this job, not also to the next one.
        let start = now();
        self.ctx.job.start_time = start;
        self.ctx.job.job_tdate = start;
        self.ctx.status = JobStatus::Running;
        self.ctx.job.status = JobStatus::Running;
        self.catalog.update_job_start(&self.ctx.job).await?;

        worker.run().await?;
        let termination = worker.wait_for_termination().await?;
        self.ctx.status = termination.status();
        self.ctx.counters = WorkerCounters {
            job_files: termination.job_files,
            job_bytes: termination.job_bytes,
            read_bytes: termination.read_bytes,
            job_errors: termination.job_errors,
        };

        if let Err(e) = self
            .catalog
            .batch_insert_files(self.ctx.job_id(), &termination.file_records)
            .await
        {
            warn!(error = %e, "could not batch-write file records");
            self.ctx.counters.job_errors += 1;
        }

        self.cleanup(worker, first_level).await?;

        if !self.ctx.status.is_ok() {
            return Err(DirectorError::WorkerFailed(self.ctx.status));
        }

        if self.ctx.config.always_incremental
            && self.ctx.config.always_incremental_job_retention.is_some()
        {
            self.catalog.purge_jobs(&jobids).await?;
            info!(
                jobids = ?jobids,
                job_id = self.ctx.job_id(),
                "purged JobIds as they were consolidated"
            );
        }

        Ok(())
    }

    async fn resolve_jobids(&self) -> Result<Vec<JobId>> {
        if let Some(list) = &self.ctx.supplied_jobids {
            debug!(jobids = ?list, "caller-supplied consolidation set");
            return Ok(list.clone());
        }
        let chain = self
            .catalog
            .accurate_get_jobids(self.ctx.job.client_id, self.ctx.job.fileset_id)
            .await?;
        debug!(jobids = ?chain, "consolidate candidates");
        Ok(chain)
    }

    /// Every missing and every purged JobId is reported before the fatal
    /// return; one bad id must not hide the others.
    async fn check_consistency(&self, jobids: &[JobId]) -> Result<()> {
        let rows = self.catalog.check_consistency(jobids).await?;

        let present: HashSet<JobId> = rows.iter().map(|r| r.job_id).collect();
        let missing: Vec<JobId> = jobids
            .iter()
            .copied()
            .filter(|id| !present.contains(id))
            .collect();
        if !missing.is_empty() {
            for id in &missing {
                error!(job_id = id, "JobId {id} is not present in the catalog");
            }
            error!("Jobs missing from catalog. Cannot continue.");
            return Err(DirectorError::JobsMissing(missing));
        }

        let purged: Vec<JobId> = rows
            .iter()
            .filter(|r| r.purged_files != 0)
            .map(|r| r.job_id)
            .collect();
        if !purged.is_empty() {
            for id in &purged {
                error!(job_id = id, "Files for JobId {id} have been purged from the catalog");
            }
            error!("At least one job's files were pruned from the catalog.");
            return Err(DirectorError::JobsPurged(purged));
        }

        Ok(())
    }

    /// Build the restore bootstrap from the accurate file list, resolve the
    /// volumes backing it, and write it into the working directory.
    async fn create_bootstrap(&mut self, jobids: &[JobId]) -> Result<String> {
        let mut bootstrap = RestoreBootstrap::new();
        self.catalog
            .get_file_list(jobids, false, true, &mut |row| {
                bootstrap.insert(&row);
                true
            })
            .await?;

        let volumes = self.catalog.volumes_for_jobs(&bootstrap.jobids()).await?;
        let path = self.ctx.config.working_directory.join(format!(
            "{}.{}.bsr",
            self.ctx.job.name,
            self.ctx.job_id()
        ));
        self.ctx.expected_files = bootstrap.write(&path, &volumes).await?;

        if self.ctx.expected_files == 0 {
            error!("Could not create bootstrap file");
            return Err(DirectorError::EmptyBootstrap);
        }
        debug!(
            files = self.ctx.expected_files,
            deleted = bootstrap.deleted_count(),
            path = %path.display(),
            "bootstrap written"
        );

        let text = bootstrap.render(&volumes);
        self.bootstrap_text = Some(text.clone());
        Ok(text)
    }

    /// Finalize the job with the observed status. Always runs, so the job
    /// row ends up consistent whether the worker succeeded or not.
    async fn cleanup(&mut self, worker: &mut dyn StorageWorker, first_level: JobLevel) -> Result<()> {
        debug!(status = %self.ctx.status, "enter virtual backup cleanup");

        if self.ctx.status.is_ok() {
            // The synthetic job stands in for the chain, so it is classified
            // like the job the chain started with.
            self.ctx.job.level = first_level;
            info!(
                level = %first_level,
                "Joblevel was set to joblevel of first consolidated job"
            );
        }

        self.ctx.job.job_files = self.ctx.counters.job_files as i64;
        self.ctx.job.job_bytes = self.ctx.counters.job_bytes as i64;
        self.ctx.job.read_bytes = self.ctx.counters.read_bytes as i64;
        self.ctx.job.job_errors = self.ctx.counters.job_errors as i64;

        if self.ctx.status == JobStatus::Terminated && self.ctx.counters.job_errors > 0 {
            self.ctx.status = JobStatus::Warnings;
        }

        self.ctx.job.status = self.ctx.status;
        self.ctx.job.end_time = now();
        self.catalog.update_job_end(&self.ctx.job).await?;
        self.finalized = true;

        // Take over the last consolidated job's times; this is what makes
        // the next incremental reference the right baseline.
        if let Some(prev) = &self.ctx.previous_job {
            self.catalog
                .update_job_times(self.ctx.job_id(), prev.start_time, prev.end_time, prev.job_tdate)
                .await?;
        }

        match self.catalog.get_job(self.ctx.job_id()).await {
            Ok(Some(job)) => self.ctx.job = job,
            Ok(None) => {
                warn!("Error getting Job record for Job report");
                self.ctx.status = JobStatus::ErrorTerminated;
            }
            Err(e) => {
                warn!(error = %e, "Error getting Job record for Job report");
                self.ctx.status = JobStatus::ErrorTerminated;
            }
        }

        // Deleted-file replication is best effort: a housekeeping failure
        // must not fail a job whose data already landed.
        if let Some(source) = self.ctx.supplied_jobids.clone() {
            if !source.is_empty() {
                info!(
                    source = ?source,
                    job_id = self.ctx.job_id(),
                    "Replicating deleted files"
                );
                match self
                    .catalog
                    .replicate_deleted_files(&source, self.ctx.job_id())
                    .await
                {
                    Ok(rows) => debug!(rows, "deleted files replicated"),
                    Err(e) => warn!(error = %e, "Error replicating deleted files"),
                }
            }
        }

        if matches!(
            self.ctx.status,
            JobStatus::ErrorTerminated | JobStatus::FatalError | JobStatus::Canceled
        ) {
            if let Err(e) = worker.signal_terminate().await {
                warn!(error = %e, "could not signal storage worker termination");
            }
        }

        self.update_bootstrap_file().await;
        self.emit_summary();
        Ok(())
    }

    /// Refresh the job's restore bootstrap for future restores.
    async fn update_bootstrap_file(&self) {
        let Some(text) = &self.bootstrap_text else {
            return;
        };
        let path = self
            .ctx
            .config
            .working_directory
            .join(format!("{}.bsr", self.ctx.job.name));
        if let Err(e) = tokio::fs::write(&path, text).await {
            warn!(path = %path.display(), error = %e, "could not update bootstrap file");
        }
    }

    fn emit_summary(&self) {
        let term_msg = match self.ctx.status {
            JobStatus::Terminated => "Backup OK",
            JobStatus::Warnings => "Backup OK -- with warnings",
            JobStatus::Canceled => "Backup Canceled",
            _ => "*** Backup Error ***",
        };
        info!(
            job_id = self.ctx.job_id(),
            job = %self.ctx.job.name,
            level = %self.ctx.job.level,
            client = %self.ctx.client_name,
            fileset = %self.ctx.fileset_name,
            expected_files = self.ctx.expected_files,
            job_files = self.ctx.job.job_files,
            job_bytes = self.ctx.job.job_bytes,
            read_bytes = self.ctx.job.read_bytes,
            errors = self.ctx.job.job_errors,
            status = %self.ctx.status,
            "{term_msg}"
        );
    }
}

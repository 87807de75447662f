//! Virtual Backup Consolidation Tests
//!
//! End-to-end runs of the consolidator against an in-memory catalog and a
//! scripted storage worker: chain validation, bootstrap selection, the
//! level/timestamp inheritance laws, deleted-file replication and the
//! always-incremental purge.

use async_trait::async_trait;
use blockvault_catalog::{
    CatalogStore, JobRecord, NewFileRow, SqliteCatalog,
};
use blockvault_core::{JobId, JobLevel, JobStatus};
use blockvault_director::{
    DirectorError, JobConfig, JobContext, StorageWorker, VirtualBackupJob, WorkerTermination,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct StartedJob {
    read_storage: Vec<String>,
    write_storage: Vec<String>,
    bootstrap: String,
}

/// Scripted storage worker: records what the director sends and reports a
/// canned termination.
struct MockWorker {
    termination: WorkerTermination,
    connected: bool,
    started: Option<StartedJob>,
    ran: bool,
    terminate_signaled: bool,
}

impl MockWorker {
    fn reporting(status: JobStatus) -> Self {
        Self {
            termination: WorkerTermination {
                status: Some(status),
                job_files: 2,
                job_bytes: 4096,
                read_bytes: 8192,
                job_errors: 0,
                file_records: Vec::new(),
            },
            connected: false,
            started: None,
            ran: false,
            terminate_signaled: false,
        }
    }

    fn succeeding() -> Self {
        Self::reporting(JobStatus::Terminated)
    }
}

#[async_trait]
impl StorageWorker for MockWorker {
    async fn connect(&mut self, _timeout: Duration) -> blockvault_director::Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn start_job(
        &mut self,
        read_storage: &[String],
        write_storage: &[String],
        bootstrap: &str,
    ) -> blockvault_director::Result<()> {
        self.started = Some(StartedJob {
            read_storage: read_storage.to_vec(),
            write_storage: write_storage.to_vec(),
            bootstrap: bootstrap.to_string(),
        });
        Ok(())
    }

    async fn run(&mut self) -> blockvault_director::Result<()> {
        self.ran = true;
        Ok(())
    }

    async fn wait_for_termination(&mut self) -> blockvault_director::Result<WorkerTermination> {
        Ok(self.termination.clone())
    }

    async fn signal_terminate(&mut self) -> blockvault_director::Result<()> {
        self.terminate_signaled = true;
        Ok(())
    }
}

struct Fixture {
    catalog: Arc<SqliteCatalog>,
    client_id: i64,
    fileset_id: i64,
    /// Full at t=1000, incrementals at t=2000 and t=3000.
    chain: Vec<JobId>,
    workdir: TempDir,
}

async fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let catalog = Arc::new(SqliteCatalog::new_in_memory().await.unwrap());
    let client_id = catalog.get_or_create_client("client-1").await.unwrap();
    let fileset_id = catalog.get_or_create_fileset("all-files").await.unwrap();

    let mut full_pool = catalog.get_or_create_pool("Full").await.unwrap();
    full_pool.next_pool = Some("Consolidated".to_string());
    full_pool.storage = vec!["File1".to_string()];
    catalog.update_pool(&full_pool).await.unwrap();

    let mut next_pool = catalog.get_or_create_pool("Consolidated").await.unwrap();
    next_pool.storage = vec!["File2".to_string()];
    catalog.update_pool(&next_pool).await.unwrap();

    let mut chain = Vec::new();
    for (level, start_time) in [
        (JobLevel::Full, 1_000),
        (JobLevel::Incremental, 2_000),
        (JobLevel::Incremental, 3_000),
    ] {
        let mut job = JobRecord::new_backup("nightly", level, client_id, fileset_id);
        job.status = JobStatus::Terminated;
        job.start_time = start_time;
        job.end_time = start_time + 60;
        job.job_tdate = start_time;
        catalog.create_job(&mut job).await.unwrap();
        chain.push(job.job_id);
    }

    // File history across the chain:
    //   /a/b   in every job, newest version in the last one
    //   /a/c   only in the full
    //   /a/d   created in the full, deleted (file_index 0) in the last job
    let (j1, j2, j3) = (chain[0], chain[1], chain[2]);
    add_file(&catalog, j1, "/a/", "b", 1).await;
    add_file(&catalog, j1, "/a/", "c", 2).await;
    add_file(&catalog, j1, "/a/", "d", 3).await;
    add_file(&catalog, j2, "/a/", "b", 1).await;
    add_file(&catalog, j3, "/a/", "b", 2).await;
    add_file(&catalog, j3, "/a/", "d", 0).await;

    catalog.add_job_media(j1, "vol-full", 1, 3).await.unwrap();
    catalog.add_job_media(j2, "vol-inc1", 1, 1).await.unwrap();
    catalog.add_job_media(j3, "vol-inc2", 1, 2).await.unwrap();

    Fixture {
        catalog,
        client_id,
        fileset_id,
        chain,
        workdir: TempDir::new().unwrap(),
    }
}

async fn add_file(catalog: &SqliteCatalog, job_id: JobId, path: &str, name: &str, index: i32) {
    catalog
        .batch_insert_files(
            job_id,
            &[NewFileRow {
                file_index: index,
                path: path.to_string(),
                name: name.to_string(),
                lstat: format!("lstat-{job_id}"),
                md5: String::new(),
            }],
        )
        .await
        .unwrap();
}

impl Fixture {
    fn config(&self) -> JobConfig {
        JobConfig {
            working_directory: self.workdir.path().to_path_buf(),
            ..Default::default()
        }
    }

    /// Create the synthetic job's row and context.
    async fn vbackup(&self, config: JobConfig, supplied: Option<Vec<JobId>>) -> VirtualBackupJob {
        let mut job = JobRecord::new_backup(
            "nightly",
            JobLevel::VirtualFull,
            self.client_id,
            self.fileset_id,
        );
        self.catalog.create_job(&mut job).await.unwrap();

        let mut ctx = JobContext::new(job, "client-1", "all-files", "Full", config);
        ctx.supplied_jobids = supplied;
        VirtualBackupJob::new(self.catalog.clone(), ctx)
    }

    async fn files_of(&self, job_id: JobId) -> Vec<(String, i32)> {
        let mut rows = Vec::new();
        self.catalog
            .get_file_list(&[job_id], false, true, &mut |row| {
                rows.push((row.name.clone(), row.file_index));
                true
            })
            .await
            .unwrap();
        rows.sort();
        rows
    }
}

#[tokio::test]
async fn test_successful_three_job_consolidation() {
    let fx = fixture().await;
    let (j1, j3) = (fx.chain[0], fx.chain[2]);

    let mut vb = fx.vbackup(fx.config(), Some(fx.chain.clone())).await;
    vb.init().await.unwrap();

    let mut worker = MockWorker::succeeding();
    worker.termination.file_records = vec![NewFileRow {
        file_index: 1,
        path: "/a/".to_string(),
        name: "b".to_string(),
        lstat: "lstat-new".to_string(),
        md5: String::new(),
    }];

    vb.run(&mut worker).await.unwrap();

    // The worker got the pools' storage lists and a bootstrap selecting the
    // newest version of every live file.
    let started = worker.started.clone().unwrap();
    assert_eq!(started.read_storage, vec!["File1".to_string()]);
    assert_eq!(started.write_storage, vec!["File2".to_string()]);
    let expected_bootstrap = format!(
        "Volume=\"vol-full\"\nJobId={j1}\nFileIndex=2\n\
         Volume=\"vol-inc2\"\nJobId={j3}\nFileIndex=2\n"
    );
    assert_eq!(started.bootstrap, expected_bootstrap);
    assert!(worker.ran);
    assert!(!worker.terminate_signaled);

    let ctx = vb.context();
    assert_eq!(ctx.expected_files, 2);
    assert_eq!(ctx.status, JobStatus::Terminated);

    // Level comes from the first consolidated job, times from the last one.
    assert_eq!(ctx.job.level, JobLevel::Full);
    assert_eq!(ctx.job.start_time, 3_000);
    assert_eq!(ctx.job.end_time, 3_060);
    assert_eq!(ctx.job.job_tdate, 3_000);
    assert_eq!(ctx.job.job_files, 2);
    assert_eq!(ctx.job.job_bytes, 4096);
    assert_eq!(ctx.job.read_bytes, 8192);

    let stored = fx.catalog.get_job(ctx.job_id()).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Terminated);
    assert_eq!(stored.level, JobLevel::Full);
    assert_eq!(stored.start_time, 3_000);

    // Worker file records were batch-written and /a/d's deletion marker was
    // replicated under the new job.
    assert_eq!(
        fx.files_of(ctx.job_id()).await,
        vec![("b".to_string(), 1), ("d".to_string(), 0)]
    );

    // Both bootstrap files landed in the working directory.
    let per_run = fx
        .workdir
        .path()
        .join(format!("nightly.{}.bsr", ctx.job_id()));
    let current = fx.workdir.path().join("nightly.bsr");
    assert_eq!(tokio::fs::read_to_string(per_run).await.unwrap(), started.bootstrap);
    assert_eq!(tokio::fs::read_to_string(current).await.unwrap(), started.bootstrap);
}

#[tokio::test]
async fn test_accurate_chain_is_used_without_supplied_list() {
    let fx = fixture().await;

    let mut vb = fx.vbackup(fx.config(), None).await;
    vb.init().await.unwrap();

    let mut worker = MockWorker::succeeding();
    vb.run(&mut worker).await.unwrap();

    // Same chain resolved from the catalog, but no caller-supplied list
    // means no deleted-file replication.
    assert!(worker.started.is_some());
    assert_eq!(vb.context().job.level, JobLevel::Full);
    assert!(fx.files_of(vb.context().job_id()).await.is_empty());
}

#[tokio::test]
async fn test_purged_job_fails_before_worker_contact() {
    let fx = fixture().await;
    let j2 = fx.chain[1];
    fx.catalog.purge_files(&[j2]).await.unwrap();

    let mut vb = fx.vbackup(fx.config(), Some(fx.chain.clone())).await;
    vb.init().await.unwrap();

    let mut worker = MockWorker::succeeding();
    let err = vb.run(&mut worker).await.unwrap_err();
    assert!(matches!(err, DirectorError::JobsPurged(ref ids) if ids == &vec![j2]));

    // No storage-worker connection was attempted, and the job row was still
    // finalized.
    assert!(!worker.connected);
    assert!(worker.started.is_none());
    let stored = fx.catalog.get_job(vb.context().job_id()).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::FatalError);
}

#[tokio::test]
async fn test_missing_jobs_are_all_reported() {
    let fx = fixture().await;
    let mut supplied = fx.chain.clone();
    supplied.push(9_998);
    supplied.push(9_999);

    let mut vb = fx.vbackup(fx.config(), Some(supplied)).await;
    vb.init().await.unwrap();

    let mut worker = MockWorker::succeeding();
    let err = vb.run(&mut worker).await.unwrap_err();
    assert!(matches!(err, DirectorError::JobsMissing(ref ids) if ids == &vec![9_998, 9_999]));
    assert!(!worker.connected);
}

#[tokio::test]
async fn test_no_previous_jobs_is_fatal() {
    let catalog = Arc::new(SqliteCatalog::new_in_memory().await.unwrap());
    let client_id = catalog.get_or_create_client("client-1").await.unwrap();
    let fileset_id = catalog.get_or_create_fileset("all-files").await.unwrap();

    let mut pool = catalog.get_or_create_pool("Full").await.unwrap();
    pool.next_pool = Some("Consolidated".to_string());
    pool.storage = vec!["File1".to_string()];
    catalog.update_pool(&pool).await.unwrap();
    let mut next = catalog.get_or_create_pool("Consolidated").await.unwrap();
    next.storage = vec!["File2".to_string()];
    catalog.update_pool(&next).await.unwrap();

    let workdir = TempDir::new().unwrap();
    let mut job = JobRecord::new_backup("nightly", JobLevel::VirtualFull, client_id, fileset_id);
    catalog.create_job(&mut job).await.unwrap();
    let ctx = JobContext::new(
        job,
        "client-1",
        "all-files",
        "Full",
        JobConfig {
            working_directory: workdir.path().to_path_buf(),
            ..Default::default()
        },
    );

    let mut vb = VirtualBackupJob::new(catalog, ctx);
    vb.init().await.unwrap();

    let mut worker = MockWorker::succeeding();
    assert!(matches!(
        vb.run(&mut worker).await,
        Err(DirectorError::NoPreviousJobs)
    ));
}

#[tokio::test]
async fn test_empty_bootstrap_is_fatal() {
    let fx = fixture().await;

    // A consolidation set whose only file row is a deletion marker selects
    // nothing to rewrite.
    let mut marker_job = JobRecord::new_backup(
        "nightly",
        JobLevel::Incremental,
        fx.client_id,
        fx.fileset_id,
    );
    marker_job.status = JobStatus::Terminated;
    marker_job.start_time = 4_000;
    fx.catalog.create_job(&mut marker_job).await.unwrap();
    add_file(&fx.catalog, marker_job.job_id, "/a/", "gone", 0).await;

    let mut vb = fx.vbackup(fx.config(), Some(vec![marker_job.job_id])).await;
    vb.init().await.unwrap();

    let mut worker = MockWorker::succeeding();
    assert!(matches!(
        vb.run(&mut worker).await,
        Err(DirectorError::EmptyBootstrap)
    ));
    assert!(!worker.connected);
}

#[tokio::test]
async fn test_worker_failure_surfaces_and_signals_terminate() {
    let fx = fixture().await;

    let mut vb = fx.vbackup(fx.config(), Some(fx.chain.clone())).await;
    vb.init().await.unwrap();

    let mut worker = MockWorker::reporting(JobStatus::ErrorTerminated);
    let err = vb.run(&mut worker).await.unwrap_err();
    assert!(matches!(
        err,
        DirectorError::WorkerFailed(JobStatus::ErrorTerminated)
    ));
    assert!(worker.terminate_signaled);

    // Cleanup still finalized the row with the worker's status, and the
    // level override did not apply.
    let stored = fx.catalog.get_job(vb.context().job_id()).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::ErrorTerminated);
    assert_eq!(stored.level, JobLevel::VirtualFull);
}

#[tokio::test]
async fn test_errors_downgrade_termination_to_warnings() {
    let fx = fixture().await;

    let mut vb = fx.vbackup(fx.config(), Some(fx.chain.clone())).await;
    vb.init().await.unwrap();

    let mut worker = MockWorker::succeeding();
    worker.termination.job_errors = 3;
    vb.run(&mut worker).await.unwrap();

    assert_eq!(vb.context().status, JobStatus::Warnings);
    let stored = fx.catalog.get_job(vb.context().job_id()).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Warnings);
    assert_eq!(stored.job_errors, 3);
    // Warnings still count as success: the level override applied.
    assert_eq!(stored.level, JobLevel::Full);
}

#[tokio::test]
async fn test_always_incremental_purges_consolidated_jobs() {
    let fx = fixture().await;

    let config = JobConfig {
        always_incremental: true,
        always_incremental_job_retention: Some(86_400),
        ..fx.config()
    };
    let mut vb = fx.vbackup(config, Some(fx.chain.clone())).await;
    vb.init().await.unwrap();

    let mut worker = MockWorker::succeeding();
    vb.run(&mut worker).await.unwrap();

    for job_id in &fx.chain {
        assert!(fx.catalog.get_job(*job_id).await.unwrap().is_none());
    }
    assert!(fx
        .catalog
        .get_job(vb.context().job_id())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_retention_unset_keeps_consolidated_jobs() {
    let fx = fixture().await;

    let config = JobConfig {
        always_incremental: true,
        always_incremental_job_retention: None,
        ..fx.config()
    };
    let mut vb = fx.vbackup(config, Some(fx.chain.clone())).await;
    vb.init().await.unwrap();

    let mut worker = MockWorker::succeeding();
    vb.run(&mut worker).await.unwrap();

    for job_id in &fx.chain {
        assert!(fx.catalog.get_job(*job_id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_next_pool_precedence_run_override_wins() {
    let fx = fixture().await;
    let mut override_pool = fx.catalog.get_or_create_pool("OverridePool").await.unwrap();
    override_pool.storage = vec!["FileX".to_string()];
    fx.catalog.update_pool(&override_pool).await.unwrap();

    let config = JobConfig {
        run_next_pool_override: Some("OverridePool".to_string()),
        job_next_pool: Some("Consolidated".to_string()),
        ..fx.config()
    };
    let mut vb = fx.vbackup(config, Some(fx.chain.clone())).await;
    vb.init().await.unwrap();

    let ctx = vb.context();
    assert_eq!(ctx.write_pool.as_ref().unwrap().name, "OverridePool");
    assert_eq!(ctx.write_storage, vec!["FileX".to_string()]);
    assert_eq!(ctx.job.pool_id, Some(override_pool.pool_id));
    // The read side still comes from the configured pool.
    assert_eq!(ctx.read_pool.as_ref().unwrap().name, "Full");
    assert_eq!(ctx.read_storage, vec!["File1".to_string()]);
}

#[tokio::test]
async fn test_init_fails_without_next_pool() {
    let fx = fixture().await;
    let lonely = fx.catalog.get_or_create_pool("Lonely").await.unwrap();
    assert!(lonely.next_pool.is_none());

    let config = JobConfig {
        run_pool_override: Some("Lonely".to_string()),
        ..fx.config()
    };
    let mut vb = fx.vbackup(config, None).await;
    assert!(matches!(vb.init().await, Err(DirectorError::NoNextPool)));
}

#[tokio::test]
async fn test_init_fails_on_empty_write_storage() {
    let fx = fixture().await;
    // "Empty" exists but carries no storage resources.
    fx.catalog.get_or_create_pool("Empty").await.unwrap();

    let config = JobConfig {
        run_next_pool_override: Some("Empty".to_string()),
        ..fx.config()
    };
    let mut vb = fx.vbackup(config, None).await;
    assert!(matches!(
        vb.init().await,
        Err(DirectorError::NoWriteStorage)
    ));
}

#[tokio::test]
async fn test_duplicate_job_policy_rejects() {
    let fx = fixture().await;

    let mut running = JobRecord::new_backup(
        "nightly",
        JobLevel::Incremental,
        fx.client_id,
        fx.fileset_id,
    );
    running.status = JobStatus::Running;
    fx.catalog.create_job(&mut running).await.unwrap();

    let config = JobConfig {
        allow_duplicate_jobs: false,
        ..fx.config()
    };
    let mut vb = fx.vbackup(config, None).await;
    assert!(matches!(
        vb.init().await,
        Err(DirectorError::DuplicateJob(_))
    ));
}

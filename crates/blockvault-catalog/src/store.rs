//! SQLite Catalog Implementation
//!
//! Implements the [`CatalogStore`] trait on SQLite via SQLx.
//!
//! ## Why runtime queries?
//!
//! This module uses **runtime queries** (`sqlx::query`) instead of the
//! compile-time macros (`sqlx::query!`) so the workspace builds without a
//! DATABASE_URL or prepared query metadata. Column access goes through
//! `row.get("name")` with explicit casts.
//!
//! ## Migrations
//!
//! The baseline schema is embedded and applied on startup via
//! `sqlx::migrate!("./migrations")`.
//!
//! ## In-memory catalogs
//!
//! `new_in_memory()` exists for tests. The pool is pinned to a single
//! connection there: every `sqlite::memory:` connection is its own empty
//! database, so a wider pool would scatter state across invisible shards.

use crate::error::{CatalogError, Result};
use crate::types::{FileListRow, JobConsistencyRow, JobRecord, NewFileRow, PoolRecord};
use crate::{CatalogStore, FileListHandler};
use async_trait::async_trait;
use blockvault_core::{JobId, JobLevel, JobStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// SQLite-backed catalog store.
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open (or create) a catalog database file.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory catalog for tests.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn id_list(jobids: &[JobId]) -> String {
    jobids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn char_column(row: &SqliteRow, column: &str) -> char {
    row.get::<String, _>(column).chars().next().unwrap_or(' ')
}

fn job_from_row(row: &SqliteRow) -> Result<JobRecord> {
    Ok(JobRecord {
        job_id: row.get("job_id"),
        name: row.get("name"),
        job_type: char_column(row, "job_type"),
        level: JobLevel::from_code(char_column(row, "level"))?,
        status: JobStatus::from_code(char_column(row, "status"))?,
        client_id: row.get("client_id"),
        fileset_id: row.get("fileset_id"),
        pool_id: row.get("pool_id"),
        sched_time: row.get("sched_time"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        job_tdate: row.get("job_tdate"),
        job_files: row.get("job_files"),
        job_bytes: row.get("job_bytes"),
        read_bytes: row.get("read_bytes"),
        job_errors: row.get("job_errors"),
        purged_files: row.get("purged_files"),
    })
}

fn pool_from_row(row: &SqliteRow) -> Result<PoolRecord> {
    let storage: Vec<String> = serde_json::from_str(&row.get::<String, _>("storage"))?;
    Ok(PoolRecord {
        pool_id: row.get("pool_id"),
        name: row.get("name"),
        next_pool: row.get("next_pool"),
        storage,
    })
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn get_or_create_client(&self, name: &str) -> Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO clients (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT client_id FROM clients WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("client_id"))
    }

    async fn get_or_create_fileset(&self, name: &str) -> Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO filesets (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT fileset_id FROM filesets WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("fileset_id"))
    }

    async fn get_or_create_pool(&self, name: &str) -> Result<PoolRecord> {
        sqlx::query("INSERT OR IGNORE INTO pools (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        self.get_pool(name)
            .await?
            .ok_or_else(|| CatalogError::PoolNotFound(name.to_string()))
    }

    async fn get_pool(&self, name: &str) -> Result<Option<PoolRecord>> {
        let row = sqlx::query("SELECT pool_id, name, next_pool, storage FROM pools WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| pool_from_row(&r)).transpose()
    }

    async fn update_pool(&self, pool: &PoolRecord) -> Result<()> {
        let storage = serde_json::to_string(&pool.storage)?;
        let result = sqlx::query("UPDATE pools SET next_pool = ?, storage = ? WHERE pool_id = ?")
            .bind(&pool.next_pool)
            .bind(storage)
            .bind(pool.pool_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::PoolNotFound(pool.name.clone()));
        }
        Ok(())
    }

    async fn create_job(&self, job: &mut JobRecord) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO jobs (name, job_type, level, status, client_id, fileset_id, pool_id,
                               sched_time, start_time, end_time, job_tdate,
                               job_files, job_bytes, read_bytes, job_errors, purged_files)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.name)
        .bind(job.job_type.to_string())
        .bind(job.level.code().to_string())
        .bind(job.status.code().to_string())
        .bind(job.client_id)
        .bind(job.fileset_id)
        .bind(job.pool_id)
        .bind(job.sched_time)
        .bind(job.start_time)
        .bind(job.end_time)
        .bind(job.job_tdate)
        .bind(job.job_files)
        .bind(job.job_bytes)
        .bind(job.read_bytes)
        .bind(job.job_errors)
        .bind(job.purged_files)
        .execute(&self.pool)
        .await?;

        job.job_id = result.last_insert_rowid();
        debug!(job_id = job.job_id, name = %job.name, "job row created");
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    async fn update_job_start(&self, job: &JobRecord) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET level = ?, status = ?, pool_id = ?, start_time = ?, job_tdate = ?
             WHERE job_id = ?",
        )
        .bind(job.level.code().to_string())
        .bind(job.status.code().to_string())
        .bind(job.pool_id)
        .bind(job.start_time)
        .bind(job.job_tdate)
        .bind(job.job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::JobNotFound(job.job_id));
        }
        Ok(())
    }

    async fn update_job_end(&self, job: &JobRecord) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET level = ?, status = ?, end_time = ?,
                             job_files = ?, job_bytes = ?, read_bytes = ?, job_errors = ?
             WHERE job_id = ?",
        )
        .bind(job.level.code().to_string())
        .bind(job.status.code().to_string())
        .bind(job.end_time)
        .bind(job.job_files)
        .bind(job.job_bytes)
        .bind(job.read_bytes)
        .bind(job.job_errors)
        .bind(job.job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::JobNotFound(job.job_id));
        }
        Ok(())
    }

    async fn update_job_times(
        &self,
        job_id: JobId,
        start_time: i64,
        end_time: i64,
        job_tdate: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET start_time = ?, end_time = ?, job_tdate = ? WHERE job_id = ?",
        )
        .bind(start_time)
        .bind(end_time)
        .bind(job_tdate)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn count_running_jobs(&self, name: &str, exclude: JobId) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM jobs
             WHERE name = ? AND status IN ('C', 'R', 'S') AND job_id != ?",
        )
        .bind(name)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn accurate_get_jobids(&self, client_id: i64, fileset_id: i64) -> Result<Vec<JobId>> {
        let full = sqlx::query(
            "SELECT job_id, start_time FROM jobs
             WHERE client_id = ? AND fileset_id = ? AND job_type = 'B'
               AND level = 'F' AND status IN ('T', 'W')
             ORDER BY start_time DESC, job_id DESC LIMIT 1",
        )
        .bind(client_id)
        .bind(fileset_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(full) = full else {
            return Ok(Vec::new());
        };
        let mut jobids: Vec<JobId> = vec![full.get("job_id")];
        let mut reference: i64 = full.get("start_time");

        let diff = sqlx::query(
            "SELECT job_id, start_time FROM jobs
             WHERE client_id = ? AND fileset_id = ? AND job_type = 'B'
               AND level = 'D' AND status IN ('T', 'W') AND start_time > ?
             ORDER BY start_time DESC, job_id DESC LIMIT 1",
        )
        .bind(client_id)
        .bind(fileset_id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(diff) = diff {
            jobids.push(diff.get("job_id"));
            reference = diff.get("start_time");
        }

        let incrementals = sqlx::query(
            "SELECT job_id FROM jobs
             WHERE client_id = ? AND fileset_id = ? AND job_type = 'B'
               AND level = 'I' AND status IN ('T', 'W') AND start_time > ?
             ORDER BY start_time ASC, job_id ASC",
        )
        .bind(client_id)
        .bind(fileset_id)
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;

        jobids.extend(incrementals.iter().map(|r| r.get::<JobId, _>("job_id")));
        debug!(client_id, fileset_id, ?jobids, "accurate chain resolved");
        Ok(jobids)
    }

    async fn check_consistency(&self, jobids: &[JobId]) -> Result<Vec<JobConsistencyRow>> {
        if jobids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT job_id, job_type, client_id, fileset_id, purged_files
             FROM jobs WHERE job_id IN ({}) ORDER BY job_id",
            id_list(jobids)
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| JobConsistencyRow {
                job_id: r.get("job_id"),
                job_type: char_column(&r, "job_type"),
                client_id: r.get("client_id"),
                fileset_id: r.get("fileset_id"),
                purged_files: r.get("purged_files"),
            })
            .collect())
    }

    async fn get_file_list(
        &self,
        jobids: &[JobId],
        use_md5: bool,
        _use_delta: bool,
        handler: &mut FileListHandler<'_>,
    ) -> Result<()> {
        if jobids.is_empty() {
            return Ok(());
        }
        let digest = if use_md5 { ", f.md5" } else { "" };
        let query = format!(
            "SELECT p.path, f.name, f.file_index, f.job_id, f.lstat{digest}
             FROM files f JOIN paths p ON p.path_id = f.path_id
             WHERE f.job_id IN ({})
             ORDER BY f.job_id ASC, f.file_index ASC",
            id_list(jobids)
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        for row in rows {
            let keep_going = handler(FileListRow {
                path: row.get("path"),
                name: row.get("name"),
                file_index: row.get("file_index"),
                job_id: row.get("job_id"),
                lstat: row.get("lstat"),
            });
            if !keep_going {
                break;
            }
        }
        Ok(())
    }

    async fn batch_insert_files(&self, job_id: JobId, rows: &[NewFileRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query("INSERT OR IGNORE INTO paths (path) VALUES (?)")
                .bind(&row.path)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO files (file_index, job_id, path_id, name, lstat, md5)
                 SELECT ?, ?, path_id, ?, ?, ? FROM paths WHERE path = ?",
            )
            .bind(row.file_index)
            .bind(job_id)
            .bind(&row.name)
            .bind(&row.lstat)
            .bind(&row.md5)
            .bind(&row.path)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn replicate_deleted_files(
        &self,
        source_jobids: &[JobId],
        new_job_id: JobId,
    ) -> Result<u64> {
        if source_jobids.is_empty() {
            return Ok(0);
        }
        let ids = id_list(source_jobids);
        // Select the most recent version of every (path, name) across the
        // source jobs, then re-insert the ones that are deletion markers.
        let query = format!(
            "INSERT INTO files (file_index, job_id, path_id, name, lstat, md5)
             SELECT f.file_index, ?, f.path_id, f.name, f.lstat, f.md5
             FROM files f
             JOIN (SELECT path_id, name, MAX(job_id) AS job_id
                   FROM files WHERE job_id IN ({ids})
                   GROUP BY path_id, name) latest
               ON f.path_id = latest.path_id
              AND f.name = latest.name
              AND f.job_id = latest.job_id
             WHERE f.file_index = 0"
        );
        let result = sqlx::query(&query)
            .bind(new_job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn add_job_media(
        &self,
        job_id: JobId,
        volume_name: &str,
        first_index: i32,
        last_index: i32,
    ) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO media (volume_name) VALUES (?)")
            .bind(volume_name)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO job_media (job_id, media_id, first_index, last_index)
             SELECT ?, media_id, ?, ? FROM media WHERE volume_name = ?",
        )
        .bind(job_id)
        .bind(first_index)
        .bind(last_index)
        .bind(volume_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn volumes_for_jobs(&self, jobids: &[JobId]) -> Result<HashMap<JobId, Vec<String>>> {
        let mut volumes: HashMap<JobId, Vec<String>> = HashMap::new();
        if jobids.is_empty() {
            return Ok(volumes);
        }
        let query = format!(
            "SELECT DISTINCT jm.job_id, m.volume_name
             FROM job_media jm JOIN media m ON m.media_id = jm.media_id
             WHERE jm.job_id IN ({}) ORDER BY jm.job_id, m.volume_name",
            id_list(jobids)
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        for row in rows {
            volumes
                .entry(row.get("job_id"))
                .or_default()
                .push(row.get("volume_name"));
        }
        Ok(volumes)
    }

    async fn purge_files(&self, jobids: &[JobId]) -> Result<()> {
        if jobids.is_empty() {
            return Ok(());
        }
        let ids = id_list(jobids);
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM files WHERE job_id IN ({ids})"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "UPDATE jobs SET purged_files = 1 WHERE job_id IN ({ids})"
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn purge_jobs(&self, jobids: &[JobId]) -> Result<()> {
        if jobids.is_empty() {
            return Ok(());
        }
        let ids = id_list(jobids);
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM files WHERE job_id IN ({ids})"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM job_media WHERE job_id IN ({ids})"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM jobs WHERE job_id IN ({ids})"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(jobids = %ids, "jobs purged from catalog");
        Ok(())
    }
}

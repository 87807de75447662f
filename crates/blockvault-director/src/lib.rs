//! BlockVault Director: Virtual Backup Consolidation
//!
//! This crate runs virtual backup (synthetic full) jobs: it consolidates a
//! chain of prior backup jobs into a single new job by selecting the newest
//! version of every file from the catalog, building a restore bootstrap,
//! handing it to a storage worker to rewrite, and finalizing the catalog so
//! the synthetic job replaces the chain.
//!
//! ## Main Components
//!
//! - [`VirtualBackupJob`]: the init/run/cleanup orchestration for one job.
//! - [`JobContext`] / [`JobConfig`]: per-job state and policy.
//! - [`RestoreBootstrap`]: newest-version file selection and the bootstrap
//!   text handed to the worker.
//! - [`StorageWorker`]: the protocol seam to the worker that moves the data.
//!
//! The catalog is reached through `Arc<dyn CatalogStore>`; nothing here
//! touches volumes directly.

pub mod bootstrap;
pub mod error;
pub mod job;
pub mod vbackup;
pub mod worker;

pub use bootstrap::RestoreBootstrap;
pub use error::{DirectorError, Result};
pub use job::{JobConfig, JobContext, WorkerCounters};
pub use vbackup::VirtualBackupJob;
pub use worker::{StorageWorker, WorkerTermination};

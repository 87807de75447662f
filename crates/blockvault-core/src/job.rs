//! Job Identifiers and Lifecycle Codes
//!
//! The catalog stores job level and status as single-character codes; these
//! enums are the typed form used everywhere else. `code()`/`from_code()`
//! convert to and from the catalog encoding.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog job identifier.
pub type JobId = i64;

/// Backup level of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobLevel {
    Full,
    Differential,
    Incremental,
    /// Synthetic full produced by consolidating prior jobs.
    VirtualFull,
}

impl JobLevel {
    pub fn code(self) -> char {
        match self {
            JobLevel::Full => 'F',
            JobLevel::Differential => 'D',
            JobLevel::Incremental => 'I',
            JobLevel::VirtualFull => 'f',
        }
    }

    pub fn from_code(code: char) -> Result<Self> {
        match code {
            'F' => Ok(JobLevel::Full),
            'D' => Ok(JobLevel::Differential),
            'I' => Ok(JobLevel::Incremental),
            'f' => Ok(JobLevel::VirtualFull),
            other => Err(Error::InvalidJobLevel(other)),
        }
    }
}

impl fmt::Display for JobLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobLevel::Full => "Full",
            JobLevel::Differential => "Differential",
            JobLevel::Incremental => "Incremental",
            JobLevel::VirtualFull => "VirtualFull",
        };
        f.write_str(name)
    }
}

/// Runtime status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Created,
    Running,
    /// Blocked waiting for the storage worker.
    WaitingStorage,
    Terminated,
    Warnings,
    ErrorTerminated,
    FatalError,
    Canceled,
}

impl JobStatus {
    pub fn code(self) -> char {
        match self {
            JobStatus::Created => 'C',
            JobStatus::Running => 'R',
            JobStatus::WaitingStorage => 'S',
            JobStatus::Terminated => 'T',
            JobStatus::Warnings => 'W',
            JobStatus::ErrorTerminated => 'E',
            JobStatus::FatalError => 'f',
            JobStatus::Canceled => 'A',
        }
    }

    pub fn from_code(code: char) -> Result<Self> {
        match code {
            'C' => Ok(JobStatus::Created),
            'R' => Ok(JobStatus::Running),
            'S' => Ok(JobStatus::WaitingStorage),
            'T' => Ok(JobStatus::Terminated),
            'W' => Ok(JobStatus::Warnings),
            'E' => Ok(JobStatus::ErrorTerminated),
            'f' => Ok(JobStatus::FatalError),
            'A' => Ok(JobStatus::Canceled),
            other => Err(Error::InvalidJobStatus(other)),
        }
    }

    /// True for the two statuses that count as a successful termination.
    pub fn is_ok(self) -> bool {
        matches!(self, JobStatus::Terminated | JobStatus::Warnings)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Created => "Created",
            JobStatus::Running => "Running",
            JobStatus::WaitingStorage => "WaitingStorage",
            JobStatus::Terminated => "Terminated",
            JobStatus::Warnings => "Warnings",
            JobStatus::ErrorTerminated => "ErrorTerminated",
            JobStatus::FatalError => "FatalError",
            JobStatus::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

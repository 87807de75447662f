//! Restore Bootstrap Construction
//!
//! The bootstrap describes what the storage worker must replay: which
//! volumes, which jobs, which file indexes. It is built from the accurate
//! file-list rows, which arrive ordered by JobId ascending — so for every
//! `(path, name)` the last row seen is the newest version and wins.
//! `file_index == 0` rows are deletion markers; they knock the file out of
//! the restore set and are kept separately for later replication into the
//! new job's catalog rows.

use blockvault_catalog::FileListRow;
use blockvault_core::JobId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Default)]
pub struct RestoreBootstrap {
    /// Newest live version per (path, name).
    selected: HashMap<(String, String), (JobId, i32)>,
    /// (path, name) pairs whose newest version is a deletion marker.
    deleted: BTreeSet<(String, String)>,
}

impl RestoreBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one file-list row. Rows must arrive ordered by JobId ascending;
    /// the last occurrence of a (path, name) wins.
    pub fn insert(&mut self, row: &FileListRow) {
        let key = (row.path.clone(), row.name.clone());
        if row.file_index == 0 {
            self.selected.remove(&key);
            self.deleted.insert(key);
        } else {
            self.deleted.remove(&key);
            self.selected.insert(key, (row.job_id, row.file_index));
        }
    }

    /// Number of files the worker is expected to rewrite.
    pub fn file_count(&self) -> u64 {
        self.selected.len() as u64
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted.len() as u64
    }

    /// The selected (JobId → sorted file indexes) mapping.
    pub fn entries(&self) -> BTreeMap<JobId, BTreeSet<i32>> {
        let mut entries: BTreeMap<JobId, BTreeSet<i32>> = BTreeMap::new();
        for (job_id, file_index) in self.selected.values() {
            entries.entry(*job_id).or_default().insert(*file_index);
        }
        entries
    }

    /// Jobs that contribute at least one selected file, ascending.
    pub fn jobids(&self) -> Vec<JobId> {
        self.entries().keys().copied().collect()
    }

    /// Render the bootstrap as text: per contributing job its volumes and
    /// the file-index ranges to replay.
    pub fn render(&self, volumes: &HashMap<JobId, Vec<String>>) -> String {
        let mut out = String::new();
        for (job_id, indexes) in self.entries() {
            if let Some(names) = volumes.get(&job_id) {
                for name in names {
                    let _ = writeln!(out, "Volume=\"{name}\"");
                }
            }
            let _ = writeln!(out, "JobId={job_id}");
            for range in compress_ranges(&indexes) {
                let _ = writeln!(out, "FileIndex={range}");
            }
        }
        out
    }

    /// Write the rendered bootstrap to `path`, returning the expected file
    /// count.
    pub async fn write(
        &self,
        path: &Path,
        volumes: &HashMap<JobId, Vec<String>>,
    ) -> std::io::Result<u64> {
        tokio::fs::write(path, self.render(volumes)).await?;
        Ok(self.file_count())
    }
}

/// Collapse sorted indexes into `a-b` / `a` range strings.
fn compress_ranges(indexes: &BTreeSet<i32>) -> Vec<String> {
    let mut ranges = Vec::new();
    let mut iter = indexes.iter().copied();
    let Some(mut start) = iter.next() else {
        return ranges;
    };
    let mut end = start;
    for index in iter {
        if index == end + 1 {
            end = index;
        } else {
            ranges.push(render_range(start, end));
            start = index;
            end = index;
        }
    }
    ranges.push(render_range(start, end));
    ranges
}

fn render_range(start: i32, end: i32) -> String {
    if start == end {
        format!("{start}")
    } else {
        format!("{start}-{end}")
    }
}

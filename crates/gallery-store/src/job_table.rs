//! Persisted job table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gallery_models::{JobId, JobRecord};

use crate::error::StoreResult;
use crate::snapshot::SnapshotFile;

/// Every job ever started, keyed by id.
pub type JobTable = BTreeMap<JobId, JobRecord>;

/// The job table on disk, rewritten whole on every status transition.
///
/// Locking is the caller's concern: the job manager serializes all
/// mutations of the table it owns.
#[derive(Debug, Clone)]
pub struct JobTableFile {
    file: SnapshotFile<JobTable>,
}

impl JobTableFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: SnapshotFile::new(path).pretty(),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Load the table; a missing or corrupted file yields an empty table.
    pub fn load(&self) -> StoreResult<JobTable> {
        self.file.ensure_parent()?;
        Ok(self.file.load())
    }

    pub fn save(&self, table: &JobTable) -> StoreResult<()> {
        self.file.save(table)
    }
}

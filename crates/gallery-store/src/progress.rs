//! Durable progress store shared by every job.
//!
//! Records, per progress key, which work items have been fully processed.
//! A later job started with the same key consults this to skip finished
//! items, which is what makes batch scripts resumable across runs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use gallery_models::ProgressRecord;

use crate::error::StoreResult;
use crate::snapshot::SnapshotFile;

type ProgressState = BTreeMap<String, ProgressRecord>;

/// Per-key set of processed items, persisted on every mutation.
///
/// All operations run under one lock for the whole store, since concurrently
/// running jobs of different scripts share it.
#[derive(Debug)]
pub struct ProgressStore {
    file: SnapshotFile<ProgressState>,
    state: Mutex<ProgressState>,
}

impl ProgressStore {
    /// Open the store backed by `path`, creating its directory if needed.
    ///
    /// A missing or corrupted file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let file: SnapshotFile<ProgressState> = SnapshotFile::new(path);
        file.ensure_parent()?;
        let state = file.load();
        debug!(
            path = %file.path().display(),
            keys = state.len(),
            "Loaded progress store"
        );
        Ok(Self {
            file,
            state: Mutex::new(state),
        })
    }

    /// Record `item` as processed under `key` and persist immediately.
    ///
    /// Idempotent: marking an already processed item keeps its original
    /// timestamp and does not rewrite the file. If persisting fails the
    /// in-memory state is rolled back and the error returned.
    pub fn mark_processed(&self, key: &str, item: &str) -> StoreResult<()> {
        let mut state = self.lock();

        let existed = state.contains_key(key);
        let record = state.entry(key.to_string()).or_default();
        let previous_update = record.updated_at;
        if !record.mark(item) {
            return Ok(());
        }

        if let Err(e) = self.file.save(&state) {
            if existed {
                if let Some(record) = state.get_mut(key) {
                    record.items.remove(item);
                    record.updated_at = previous_update;
                }
            } else {
                state.remove(key);
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn is_processed(&self, key: &str, item: &str) -> bool {
        self.lock()
            .get(key)
            .map(|record| record.contains(item))
            .unwrap_or(false)
    }

    /// Number of items processed under `key`.
    pub fn count(&self, key: &str) -> usize {
        self.lock().get(key).map(ProgressRecord::len).unwrap_or(0)
    }

    /// Forget everything recorded under `key`.
    pub fn reset(&self, key: &str) -> StoreResult<()> {
        let mut state = self.lock();
        let Some(removed) = state.remove(key) else {
            return Ok(());
        };

        if let Err(e) = self.file.save(&state) {
            state.insert(key.to_string(), removed);
            return Err(e);
        }
        info!(progress_key = %key, items = removed.len(), "Progress reset");
        Ok(())
    }

    /// Snapshot of the record for `key`, if any.
    pub fn record(&self, key: &str) -> Option<ProgressRecord> {
        self.lock().get(key).cloned()
    }

    /// All progress keys currently recorded.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

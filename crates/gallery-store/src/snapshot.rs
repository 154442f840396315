//! Whole-snapshot JSON files.
//!
//! A snapshot file holds one serialized value. Every save writes the complete
//! value to a temporary file in the same directory, syncs it, and renames it
//! over the target, so a crash mid-write leaves either the previous or the new
//! snapshot on disk, never a torn one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// A JSON file that is only ever replaced as a whole.
#[derive(Debug, Clone)]
pub struct SnapshotFile<T> {
    path: PathBuf,
    pretty: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SnapshotFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Create a handle for the snapshot at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pretty: false,
            _marker: PhantomData,
        }
    }

    /// Write indented JSON (for files operators read by hand).
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory the snapshot lives in.
    pub fn ensure_parent(&self) -> StoreResult<()> {
        fs::create_dir_all(self.dir())?;
        Ok(())
    }

    /// Load the snapshot.
    ///
    /// A missing file yields `T::default()`. An unreadable or corrupted file
    /// also yields `T::default()` after a warning; it is never fatal.
    pub fn load(&self) -> T {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read snapshot, starting empty"
                );
                return T::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Corrupted snapshot, starting empty"
                );
                T::default()
            }
        }
    }

    /// Atomically replace the snapshot with `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created or written,
    /// or if the final rename fails. The previous snapshot is left intact in
    /// every error case.
    pub fn save(&self, value: &T) -> StoreResult<()> {
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::invalid_path(self.path.display().to_string()))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".tmp")
            .tempfile_in(self.dir())?;

        if self.pretty {
            serde_json::to_writer_pretty(&mut tmp, value)?;
        } else {
            serde_json::to_writer(&mut tmp, value)?;
        }
        tmp.flush()?;
        tmp.as_file().sync_all()?;

        // Dropping `tmp` on any earlier error removes the temp file.
        tmp.persist(&self.path)?;

        debug!(path = %self.path.display(), "Snapshot replaced");
        Ok(())
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    type Doc = BTreeMap<String, u32>;

    #[test]
    fn test_missing_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let file: SnapshotFile<Doc> = SnapshotFile::new(dir.path().join("missing.json"));
        assert!(file.load().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let file: SnapshotFile<Doc> = SnapshotFile::new(dir.path().join("doc.json"));

        let mut doc = Doc::new();
        doc.insert("a".into(), 1);
        file.save(&doc).unwrap();

        assert_eq!(file.load(), doc);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let file: SnapshotFile<Doc> = SnapshotFile::new(dir.path().join("doc.json")).pretty();

        for i in 0..5 {
            let mut doc = Doc::new();
            doc.insert("n".into(), i);
            file.save(&doc).unwrap();
        }

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
        assert_eq!(file.load()["n"], 4);
    }

    #[test]
    fn test_corrupted_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{\"a\": 1, \"b\":").unwrap();

        let file: SnapshotFile<Doc> = SnapshotFile::new(&path);
        assert!(file.load().is_empty());
    }

    #[test]
    fn test_ensure_parent_creates_directories() {
        let dir = TempDir::new().unwrap();
        let file: SnapshotFile<Doc> =
            SnapshotFile::new(dir.path().join("nested").join("state").join("doc.json"));

        file.ensure_parent().unwrap();
        file.save(&Doc::new()).unwrap();
        assert!(file.path().exists());
    }
}

//! Durable state for the script runner.
//!
//! This crate provides:
//! - Whole-snapshot JSON files replaced atomically (temp file + rename)
//! - The shared per-key progress store
//! - The persisted job table file

pub mod error;
pub mod job_table;
pub mod progress;
pub mod snapshot;

pub use error::{StoreError, StoreResult};
pub use job_table::{JobTable, JobTableFile};
pub use progress::ProgressStore;
pub use snapshot::SnapshotFile;

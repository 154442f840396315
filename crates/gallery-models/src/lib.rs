//! Shared data models for the gallery script runner.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their parameters and lifecycle status
//! - Per-key progress records
//! - Incremental log chunks
//! - Script metadata exposed to admin surfaces

pub mod job;
pub mod job_status;
pub mod log;
pub mod progress;
pub mod script;

// Re-export common types
pub use job::{default_progress_key, JobId, JobParams, JobRecord};
pub use job_status::{JobStatus, JobSummary};
pub use log::LogChunk;
pub use progress::ProgressRecord;
pub use script::{ParamSpec, ScriptInfo};

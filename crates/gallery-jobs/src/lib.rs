//! Background script runner.
//!
//! This crate provides:
//! - A registry of runnable scripts, built once and handed to the manager
//! - The job manager: one worker thread per job, one active job per script
//! - The job context runners use for logging, cancellation and progress
//! - Per-job append-only log files with offset-based tailing
//! - Tracing setup and configuration

pub mod config;
pub mod context;
pub mod error;
pub mod job_log;
pub mod logging;
pub mod manager;
pub mod registry;

pub use config::JobsConfig;
pub use context::JobContext;
pub use error::{JobError, JobResult};
pub use job_log::JobLog;
pub use logging::{init_tracing, JobLogger};
pub use manager::JobManager;
pub use registry::{ProgressKeyFn, ScriptDefinition, ScriptRegistry, ScriptRunner};

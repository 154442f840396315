//! Job manager error types.

use thiserror::Error;

use gallery_models::JobId;
use gallery_store::StoreError;

pub type JobResult<T> = Result<T, JobError>;

/// Errors returned synchronously to callers of the job manager.
///
/// Failures inside a running job never show up here; they are recorded on
/// the job row and in its log.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("Invalid parameters for script '{script}': {reason}")]
    InvalidParams { script: String, reason: String },

    #[error("Script '{script}' is already running (job {job_id})")]
    AlreadyRunning { script: String, job_id: JobId },

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Failed to spawn worker for job {job_id}: {source}")]
    Spawn {
        job_id: JobId,
        #[source]
        source: std::io::Error,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    pub fn unknown_script(name: impl Into<String>) -> Self {
        Self::UnknownScript(name.into())
    }

    pub fn invalid_params(script: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            script: script.into(),
            reason: reason.into(),
        }
    }

    /// Check if the caller can fix this by changing the request.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            JobError::UnknownScript(_)
                | JobError::InvalidParams { .. }
                | JobError::AlreadyRunning { .. }
                | JobError::NotFound(_)
        )
    }
}

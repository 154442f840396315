//! Job definitions for the script runner.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::JobStatus;

/// Parameters a script was started with.
///
/// A sorted map so that serializing it is independent of insertion order.
pub type JobParams = BTreeMap<String, String>;

/// Unique identifier for a job.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Default progress key: script name plus the canonical JSON of its params.
pub fn default_progress_key(script: &str, params: &JobParams) -> String {
    let canonical = serde_json::to_string(params).unwrap_or_default();
    format!("{}:{}", script, canonical)
}

/// One row of the persisted job table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,

    /// Registered script name
    pub script: String,

    /// Parameters the script was started with
    #[serde(default)]
    pub params: JobParams,

    /// Key under which item progress is recorded
    pub progress_key: String,

    /// Append-only log file owned by this job
    pub log_path: PathBuf,

    /// Lifecycle status
    #[serde(default)]
    pub status: JobStatus,

    /// When the row was created
    pub created_at: DateTime<Utc>,

    /// When the worker began running the script
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,

    /// Items the runner reported as failed and left unmarked
    #[serde(default)]
    pub item_failures: u32,
}

impl JobRecord {
    /// Create a new queued job row.
    pub fn new(
        id: JobId,
        script: impl Into<String>,
        params: JobParams,
        progress_key: impl Into<String>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            script: script.into(),
            params,
            progress_key: progress_key.into(),
            log_path: log_path.into(),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            item_failures: 0,
        }
    }

    /// Move to `next` if the lifecycle allows it, stamping timestamps.
    ///
    /// Returns `false` (and leaves the row untouched) for illegal transitions.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.ended_at = Some(Utc::now()),
            _ => {}
        }
        true
    }

    /// Timestamp used to order the job listing (newest first).
    pub fn sort_timestamp(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.created_at)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

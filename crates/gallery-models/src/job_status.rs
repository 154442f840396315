//! Job lifecycle status and the status view served to pollers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobRecord;

/// Job lifecycle status.
///
/// Transitions are monotonic: `queued -> running -> {completed | failed | stopped}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job row exists, worker thread not yet running the script
    #[default]
    Queued,
    /// Worker thread is executing the runner
    Running,
    /// Runner returned normally without a stop request
    Completed,
    /// Runner returned an error or panicked
    Failed,
    /// Runner exited after a stop request, or the process died under it
    Stopped,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }

    /// Queued or running: the job still owns (or is about to own) a worker.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            // A queued job whose worker never started can still be closed out.
            (JobStatus::Queued, JobStatus::Failed | JobStatus::Stopped) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job row plus the live processed count for its progress key.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSummary {
    #[serde(flatten)]
    pub job: JobRecord,
    /// Items currently recorded under the job's progress key
    pub processed_count: usize,
}

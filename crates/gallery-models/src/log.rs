//! Incremental log reads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobStatus;

/// A slice of a job's log returned to a poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LogChunk {
    /// Complete lines read since the requested offset
    pub data: String,
    /// Byte offset to pass on the next read
    pub offset: u64,
    /// Job status at the time of the read
    pub status: JobStatus,
}

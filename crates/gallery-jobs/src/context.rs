//! Capability handle passed into script runners.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gallery_models::{JobId, JobParams, JobRecord};
use gallery_store::{ProgressStore, StoreResult};

use crate::job_log::JobLog;

/// Runtime state of an active job shared between its worker and the manager.
#[derive(Debug)]
pub(crate) struct JobHandle {
    pub(crate) cancel: CancellationToken,
    item_failures: AtomicU32,
}

impl Default for JobHandle {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            item_failures: AtomicU32::new(0),
        }
    }
}

impl JobHandle {
    pub(crate) fn item_failures(&self) -> u32 {
        self.item_failures.load(Ordering::Relaxed)
    }
}

/// What a runner can see and do while its job is running.
///
/// Progress reads and writes are scoped to the job's progress key, and log
/// lines go to the job's own log file.
pub struct JobContext {
    job_id: JobId,
    script: String,
    params: JobParams,
    progress_key: String,
    handle: Arc<JobHandle>,
    progress: Arc<ProgressStore>,
    log: JobLog,
}

impl JobContext {
    pub(crate) fn new(
        job: &JobRecord,
        handle: Arc<JobHandle>,
        progress: Arc<ProgressStore>,
        log: JobLog,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            script: job.script.clone(),
            params: job.params.clone(),
            progress_key: job.progress_key.clone(),
            handle,
            progress,
            log,
        }
    }

    /// Whether a stop was requested. Runners check this between items.
    pub fn should_stop(&self) -> bool {
        self.handle.cancel.is_cancelled()
    }

    /// The job's cancellation token, for runners that hand work to other code.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.handle.cancel.clone()
    }

    pub fn is_processed(&self, item: &str) -> bool {
        self.progress.is_processed(&self.progress_key, item)
    }

    /// Record `item` as fully processed under this job's progress key.
    pub fn mark_processed(&self, item: &str) -> StoreResult<()> {
        self.progress.mark_processed(&self.progress_key, item)
    }

    /// Items recorded under this job's progress key so far.
    pub fn processed_count(&self) -> usize {
        self.progress.count(&self.progress_key)
    }

    /// Append a line to the job's log.
    ///
    /// A failed write is reported through tracing and otherwise ignored; the
    /// job keeps running.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        debug!(job_id = %self.job_id, "{}", message);
        if let Err(e) = self.log.write_line(message) {
            warn!(
                job_id = %self.job_id,
                path = %self.log.path().display(),
                error = %e,
                "Failed to write job log line"
            );
        }
    }

    /// Report a per-item failure: logged and counted, the item stays unmarked.
    ///
    /// This never changes the job's terminal status; the runner keeps going.
    pub fn item_failed(&self, item: &str, error: impl fmt::Display) {
        self.handle.item_failures.fetch_add(1, Ordering::Relaxed);
        self.log(format!("Failed {}: {}", item, error));
    }

    /// Like [`item_failed`](Self::item_failed), with the item's `[index/total]`
    /// position in front of the log line.
    pub fn item_failed_at(&self, index: usize, total: usize, item: &str, error: impl fmt::Display) {
        self.handle.item_failures.fetch_add(1, Ordering::Relaxed);
        self.log(format!("[{}/{}] Failed {}: {}", index, total, item, error));
    }

    /// Per-item failures reported so far in this job.
    pub fn item_failures(&self) -> u32 {
        self.handle.item_failures()
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    /// A single parameter value, if supplied (or defaulted).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn progress_key(&self) -> &str {
        &self.progress_key
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("script", &self.script)
            .field("progress_key", &self.progress_key)
            .field("stop_requested", &self.should_stop())
            .finish()
    }
}

//! Job manager.
//!
//! Owns the job table and runs each job on its own worker thread.
//!
//! # Lifecycle
//!
//! ```text
//! start_job ──► queued ──► running ──┬─► completed   runner returned Ok
//!                                    ├─► stopped     runner returned Ok after stop_job
//!                                    └─► failed      runner returned Err or panicked
//! ```
//!
//! The table is rewritten on every transition. Rows still `queued` or
//! `running` when the manager is constructed belonged to a process that is
//! gone, so they are loaded as `stopped`.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use gallery_models::{JobId, JobParams, JobRecord, JobStatus, JobSummary, LogChunk, ScriptInfo};
use gallery_store::{JobTable, JobTableFile, ProgressStore};

use crate::config::JobsConfig;
use crate::context::{JobContext, JobHandle};
use crate::error::{JobError, JobResult};
use crate::job_log::{self, JobLog};
use crate::logging::JobLogger;
use crate::registry::{ScriptDefinition, ScriptRegistry};

/// Starts, stops and reports on background script jobs.
///
/// Cheap to clone; clones share the same table and worker threads.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<ScriptRegistry>,
    progress: Arc<ProgressStore>,
    table_file: JobTableFile,
    log_dir: PathBuf,
    /// Job table plus runtime handles of active jobs, under one lock.
    state: Mutex<JobsState>,
    /// Signalled after every status transition.
    changed: Condvar,
}

struct JobsState {
    table: JobTable,
    active: HashMap<JobId, Arc<JobHandle>>,
}

impl JobsState {
    /// Row with the live failure count for jobs still running.
    fn view(&self, job: &JobRecord) -> JobRecord {
        let mut job = job.clone();
        if let Some(handle) = self.active.get(&job.id) {
            job.item_failures = handle.item_failures();
        }
        job
    }
}

impl JobManager {
    /// Load persisted state from `config.state_dir` and get ready to run jobs.
    ///
    /// Missing or corrupted state files start empty. Jobs that were active
    /// when the previous process died are marked `stopped` and the table is
    /// persisted before this returns.
    pub fn new(config: &JobsConfig, registry: Arc<ScriptRegistry>) -> JobResult<Self> {
        let log_dir = config.log_dir();
        std::fs::create_dir_all(&log_dir)?;

        let progress = Arc::new(ProgressStore::open(config.progress_file())?);
        let table_file = JobTableFile::new(config.jobs_file());
        let mut table = table_file.load()?;

        if registry.is_empty() {
            warn!("Job manager created with no registered scripts");
        }

        if recover_interrupted(&mut table) > 0 {
            table_file.save(&table)?;
        }

        info!(
            state_dir = %config.state_dir.display(),
            jobs = table.len(),
            scripts = registry.len(),
            "Job manager ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                progress,
                table_file,
                log_dir,
                state: Mutex::new(JobsState {
                    table,
                    active: HashMap::new(),
                }),
                changed: Condvar::new(),
            }),
        })
    }

    /// Start `script` with `params` on a new worker thread.
    ///
    /// Returns the queued job row as soon as the worker is launched; it never
    /// waits for the script to run.
    ///
    /// # Errors
    ///
    /// - [`JobError::UnknownScript`] if the script is not registered
    /// - [`JobError::InvalidParams`] if `params` do not match its schema
    /// - [`JobError::AlreadyRunning`] if a job of the same script is queued or running
    /// - [`JobError::Store`] if the new row cannot be persisted
    /// - [`JobError::Spawn`] if the worker thread cannot be created
    pub fn start_job(&self, script: &str, params: JobParams) -> JobResult<JobRecord> {
        let definition = self
            .inner
            .registry
            .get(script)
            .ok_or_else(|| JobError::unknown_script(script))?;
        let params = definition.resolve_params(params)?;
        let progress_key = definition.derive_progress_key(&params);

        let id = JobId::new();
        let log_path = self.inner.log_path_for(&id, script);
        let job = JobRecord::new(id.clone(), script, params, progress_key, log_path);
        let handle = Arc::new(JobHandle::default());

        // Check and register in one critical section.
        let mut state = self.inner.lock();
        if let Some(existing) = state
            .table
            .values()
            .find(|j| j.script == script && j.is_active())
        {
            return Err(JobError::AlreadyRunning {
                script: script.to_string(),
                job_id: existing.id.clone(),
            });
        }

        state.table.insert(id.clone(), job.clone());
        if let Err(e) = self.inner.table_file.save(&state.table) {
            state.table.remove(&id);
            return Err(e.into());
        }
        state.active.insert(id.clone(), Arc::clone(&handle));

        let inner = Arc::clone(&self.inner);
        let worker_job = job.clone();
        let spawned = thread::Builder::new()
            .name(format!("job-{}", script))
            .spawn(move || run_worker(inner, definition, worker_job, handle));

        if let Err(source) = spawned {
            state.active.remove(&id);
            if let Some(row) = state.table.get_mut(&id) {
                row.transition(JobStatus::Failed);
            }
            if let Err(e) = self.inner.table_file.save(&state.table) {
                error!(job_id = %id, error = %e, "Failed to persist job table");
            }
            drop(state);
            self.inner.changed.notify_all();
            return Err(JobError::Spawn { job_id: id, source });
        }
        drop(state);

        info!(
            job_id = %id,
            script = %script,
            progress_key = %job.progress_key,
            "Job queued"
        );
        Ok(job)
    }

    /// Ask a running job to stop.
    ///
    /// Only sets the job's cancellation signal; the runner notices it the
    /// next time it checks. Returns `false` if the job is unknown or not
    /// currently `running`.
    pub fn stop_job(&self, id: &JobId) -> bool {
        let state = self.inner.lock();
        let Some(job) = state.table.get(id) else {
            return false;
        };
        if job.status != JobStatus::Running {
            return false;
        }
        let Some(handle) = state.active.get(id) else {
            return false;
        };

        handle.cancel.cancel();
        JobLogger::new(id, &job.script).log_stop_requested();
        true
    }

    pub fn get_job(&self, id: &JobId) -> Option<JobRecord> {
        let state = self.inner.lock();
        state.table.get(id).map(|job| state.view(job))
    }

    /// Every job, newest first.
    pub fn list_jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = {
            let state = self.inner.lock();
            state.table.values().map(|job| state.view(job)).collect()
        };
        jobs.sort_by(|a, b| {
            b.sort_timestamp()
                .cmp(&a.sort_timestamp())
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        jobs
    }

    /// Job row plus the live processed count for its progress key.
    pub fn job_status(&self, id: &JobId) -> JobResult<JobSummary> {
        let job = self
            .get_job(id)
            .ok_or_else(|| JobError::NotFound(id.clone()))?;
        let processed_count = self.inner.progress.count(&job.progress_key);
        Ok(JobSummary {
            job,
            processed_count,
        })
    }

    /// Read the job's log from byte `offset`.
    ///
    /// Pass the returned offset to the next call to continue where this one
    /// stopped. Once the returned status is terminal the log is complete.
    pub fn read_log(&self, id: &JobId, offset: u64) -> JobResult<LogChunk> {
        // Status first: a terminal status guarantees every line is on disk.
        let (status, log_path) = {
            let state = self.inner.lock();
            let job = state
                .table
                .get(id)
                .ok_or_else(|| JobError::NotFound(id.clone()))?;
            (job.status, job.log_path.clone())
        };

        let (data, offset) = job_log::read_from(&log_path, offset)?;
        Ok(LogChunk {
            data,
            offset,
            status,
        })
    }

    /// Block until the job is terminal or `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout.
    pub fn wait_for_terminal(&self, id: &JobId, timeout: Duration) -> JobResult<Option<JobRecord>> {
        let state = self.inner.lock();
        if !state.table.contains_key(id) {
            return Err(JobError::NotFound(id.clone()));
        }

        let (state, _) = self
            .inner
            .changed
            .wait_timeout_while(state, timeout, |s| {
                s.table.get(id).is_some_and(|job| !job.status.is_terminal())
            })
            .unwrap_or_else(|e| e.into_inner());

        Ok(state
            .table
            .get(id)
            .filter(|job| job.status.is_terminal())
            .cloned())
    }

    /// Metadata of every registered script.
    pub fn scripts(&self) -> Vec<ScriptInfo> {
        self.inner.registry.infos()
    }

    /// The progress store shared by all jobs.
    pub fn progress(&self) -> Arc<ProgressStore> {
        Arc::clone(&self.inner.progress)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, JobsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log_path_for(&self, id: &JobId, script: &str) -> PathBuf {
        let safe_script: String = script
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.log_dir.join(format!("{}-{}.log", safe_script, id))
    }

    fn mark_running(&self, id: &JobId) -> bool {
        let mut state = self.lock();
        let Some(job) = state.table.get_mut(id) else {
            return false;
        };
        if !job.transition(JobStatus::Running) {
            return false;
        }
        if let Err(e) = self.table_file.save(&state.table) {
            error!(job_id = %id, error = %e, "Failed to persist job table");
        }
        drop(state);
        self.changed.notify_all();
        true
    }

    /// Record the terminal status and release the job's runtime handle.
    ///
    /// Returns the job's final per-item failure count.
    fn finish(&self, id: &JobId, status: JobStatus) -> u32 {
        let mut state = self.lock();
        let handle = state.active.remove(id);

        let mut item_failures = 0;
        if let Some(job) = state.table.get_mut(id) {
            if let Some(handle) = &handle {
                job.item_failures = handle.item_failures();
            }
            item_failures = job.item_failures;
            if !job.transition(status) {
                warn!(
                    job_id = %id,
                    from = %job.status,
                    to = %status,
                    "Ignoring illegal job transition"
                );
            }
        }

        if let Err(e) = self.table_file.save(&state.table) {
            error!(job_id = %id, error = %e, "Failed to persist job table");
        }
        drop(state);
        self.changed.notify_all();
        item_failures
    }
}

/// Mark rows left active by a previous process as stopped.
fn recover_interrupted(table: &mut JobTable) -> usize {
    let mut recovered = 0;
    for job in table.values_mut().filter(|job| job.is_active()) {
        let previous = job.status;
        job.transition(JobStatus::Stopped);
        warn!(
            job_id = %job.id,
            script = %job.script,
            previous = %previous,
            "Job interrupted by restart, marked stopped"
        );
        recovered += 1;
    }
    recovered
}

/// Records the terminal status when the worker exits, whatever the path out.
struct FinishGuard<'a> {
    inner: &'a Inner,
    id: &'a JobId,
    logger: &'a JobLogger,
    status: JobStatus,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        let item_failures = self.inner.finish(self.id, self.status);
        self.logger.log_finished(self.status.as_str(), item_failures);
    }
}

fn run_worker(
    inner: Arc<Inner>,
    definition: Arc<ScriptDefinition>,
    job: JobRecord,
    handle: Arc<JobHandle>,
) {
    let logger = JobLogger::new(&job.id, &job.script);
    let _span = logger.create_span().entered();

    let mut finish = FinishGuard {
        inner: &inner,
        id: &job.id,
        logger: &logger,
        status: JobStatus::Failed,
    };

    if !inner.mark_running(&job.id) {
        logger.log_warning("Job was no longer queued when its worker started");
        return;
    }
    logger.log_start(&job.progress_key);

    let log = match JobLog::open(&job.log_path) {
        Ok(log) => log,
        Err(e) => {
            logger.log_error(&format!(
                "Failed to open job log {}: {}",
                job.log_path.display(),
                e
            ));
            return;
        }
    };

    let ctx = JobContext::new(&job, handle, Arc::clone(&inner.progress), log);
    ctx.log(format!(
        "Starting script '{}' with params {}",
        job.script,
        serde_json::to_string(&job.params).unwrap_or_default()
    ));

    let runner = definition.runner();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner.run(&ctx)));

    finish.status = match outcome {
        Ok(Ok(())) if ctx.should_stop() => {
            ctx.log("Stop requested; exiting early.");
            JobStatus::Stopped
        }
        Ok(Ok(())) => {
            ctx.log("Script finished successfully.");
            JobStatus::Completed
        }
        Ok(Err(e)) => {
            ctx.log(format!("Script failed: {:?}", e));
            logger.log_error(&format!("{:#}", e));
            JobStatus::Failed
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            ctx.log(format!("Script panicked: {}", message));
            logger.log_error(&format!("runner panicked: {}", message));
            JobStatus::Failed
        }
    };
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

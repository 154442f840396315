//! Structured job logging utilities.
//!
//! Process-level tracing for job lifecycle events. This is separate from the
//! per-job log file that operators tail through the manager.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gallery_models::JobId;

/// Initialize the global tracing subscriber.
///
/// Colored human output by default, JSON when `LOG_FORMAT=json`. The filter
/// comes from `RUST_LOG`, falling back to `gallery=info`. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gallery=info"));

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Job logger for structured logging with consistent formatting.
///
/// Attaches the job id and script name to every lifecycle event.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    script: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, script: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            script: script.to_string(),
        }
    }

    pub fn log_start(&self, progress_key: &str) {
        info!(
            job_id = %self.job_id,
            script = %self.script,
            progress_key = %progress_key,
            "Job started"
        );
    }

    pub fn log_stop_requested(&self) {
        info!(
            job_id = %self.job_id,
            script = %self.script,
            "Job stop requested"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            script = %self.script,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            script = %self.script,
            "Job error: {}", message
        );
    }

    pub fn log_finished(&self, status: &str, item_failures: u32) {
        info!(
            job_id = %self.job_id,
            script = %self.script,
            status = %status,
            item_failures,
            "Job finished"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// Span covering everything the worker thread does for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            script = %self.script
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "rebuild_previews");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.script(), "rebuild_previews");
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}

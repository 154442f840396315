//! Job manager configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Job manager configuration.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Directory holding the job table, progress file and job logs
    pub state_dir: PathBuf,
    /// How often log tailers poll for new lines
    pub log_poll_interval: Duration,
}

const DEFAULT_POLL_MS: u64 = 500;

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./state"),
            log_poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
        }
    }
}

impl JobsConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            state_dir: std::env::var("GALLERY_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./state")),
            log_poll_interval: poll_interval(std::env::var("GALLERY_LOG_POLL_MS").ok().as_deref()),
        }
    }

    /// Default config rooted at `state_dir`.
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Default::default()
        }
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.state_dir.join("jobs.json")
    }

    pub fn progress_file(&self) -> PathBuf {
        self.state_dir.join("progress.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

/// Poll interval in milliseconds; zero or unparsable values use the default.
fn poll_interval(value: Option<&str>) -> Duration {
    Duration::from_millis(
        value
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_POLL_MS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_under_state_dir() {
        let config = JobsConfig::with_state_dir("/var/lib/gallery");
        assert_eq!(config.jobs_file(), PathBuf::from("/var/lib/gallery/jobs.json"));
        assert_eq!(
            config.progress_file(),
            PathBuf::from("/var/lib/gallery/progress.json")
        );
        assert_eq!(config.log_dir(), PathBuf::from("/var/lib/gallery/logs"));
        assert_eq!(config.log_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_poll_interval_is_never_zero() {
        assert_eq!(poll_interval(Some("0")), Duration::from_millis(500));
        assert_eq!(poll_interval(Some("junk")), Duration::from_millis(500));
        assert_eq!(poll_interval(None), Duration::from_millis(500));
        assert_eq!(poll_interval(Some("250")), Duration::from_millis(250));
    }
}

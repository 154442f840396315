//! Error types for gallery scripts.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for script operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Errors raised while processing a single gallery item or setting up a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Preview command not found: {0}")]
    CommandNotFound(String),

    #[error("Preview command failed: {message}")]
    CommandFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to persist output: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScriptError {
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
            stderr: None,
            exit_code: None,
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat(message.into())
    }
}

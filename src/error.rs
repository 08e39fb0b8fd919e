use std::path::PathBuf;

use thiserror::Error;

pub type PmResult<T> = Result<T, PmError>;

#[derive(Debug, Error)]
pub enum PmError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid duration: {minutes} minutes (must be > 0)")]
    InvalidDuration { minutes: f64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("lexicon unavailable for language `{language}`: {detail}")]
    LexiconUnavailable { language: String, detail: String },

    #[error("transcription provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`{stderr_suffix}")]
    CommandTimedOut {
        command: String,
        timeout_ms: u64,
        stderr_suffix: String,
    },

    #[error("missing expected artifact at `{0}`")]
    MissingArtifact(PathBuf),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("session cancelled: {0}")]
    Cancelled(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Render trimmed stderr as a display suffix, or nothing when it is blank.
fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("; stderr: {trimmed}")
    }
}

impl PmError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        Self::CommandFailed {
            command,
            status,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    #[must_use]
    pub fn from_command_timeout(command: String, timeout_ms: u64, stderr: String) -> Self {
        Self::CommandTimedOut {
            command,
            timeout_ms,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    /// Stable, unique, machine-readable error code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "PM-IO",
            Self::Json(_) => "PM-JSON",
            Self::InvalidDuration { .. } => "PM-INVALID-DURATION",
            Self::InvalidRequest(_) => "PM-INVALID-REQUEST",
            Self::LexiconUnavailable { .. } => "PM-LEXICON-UNAVAILABLE",
            Self::ProviderUnavailable(_) => "PM-PROVIDER-UNAVAILABLE",
            Self::CommandMissing { .. } => "PM-CMD-MISSING",
            Self::CommandFailed { .. } => "PM-CMD-FAILED",
            Self::CommandTimedOut { .. } => "PM-CMD-TIMEOUT",
            Self::MissingArtifact(_) => "PM-MISSING-ARTIFACT",
            Self::Storage(_) => "PM-STORAGE",
            Self::Cancelled(_) => "PM-CANCELLED",
            Self::Unsupported(_) => "PM-UNSUPPORTED",
        }
    }
}

//! Error types for provisioning and supervision.
//!
//! Every installer converts its own failures into one of the variants below
//! before publishing an error event and returning to the caller. The first six
//! variants are the provisioning taxonomy; the rest carry ambient failures
//! (configuration, local I/O, archive decoding).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootError {
    /// Transfer failed, returned a non-success status, timed out or was cancelled.
    #[error("Network error while fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Downloaded or extracted artifact is implausible (too small, missing files).
    #[error("Integrity check failed for {artifact}: {message}")]
    Integrity { artifact: String, message: String },

    /// External executable exited with a non-zero status.
    #[error("{program} exited with code {}{}", .code.map(|c| c.to_string()).unwrap_or_else(|| "<signal>".to_string()), format_output_tail(.output))]
    Subprocess {
        program: String,
        code: Option<i32>,
        output: String,
    },

    /// A required artifact from an earlier step is missing.
    #[error("{what} not found: {}", .path.display())]
    Precondition { what: String, path: PathBuf },

    /// A bounded wait elapsed without the expected signal.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// Elevation check or relaunch failed.
    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Another provisioning run holds {} (pid {pid})", .path.display())]
    Locked { path: PathBuf, pid: u32 },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn format_output_tail(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl BootError {
    /// Create a network error for a URL
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an integrity error for an artifact
    pub fn integrity(artifact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Integrity {
            artifact: artifact.into(),
            message: message.into(),
        }
    }

    /// Create a subprocess error from an exit code and captured output
    pub fn subprocess(program: impl Into<String>, code: Option<i32>, output: impl Into<String>) -> Self {
        Self::Subprocess {
            program: program.into(),
            code,
            output: output.into(),
        }
    }

    /// Create a precondition error naming the missing artifact
    pub fn precondition(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Precondition {
            what: what.into(),
            path: path.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Whether re-invoking the same step has a reasonable chance to succeed.
    ///
    /// Nothing retries automatically; the user interface uses this to decide
    /// whether to offer a "try again" or "pick another mirror" hint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Integrity { .. } | Self::Timeout { .. } | Self::Locked { .. }
        )
    }

    /// Stable short name of the error class, used in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Integrity { .. } => "integrity",
            Self::Subprocess { .. } => "subprocess",
            Self::Precondition { .. } => "precondition",
            Self::Timeout { .. } => "timeout",
            Self::Privilege(_) => "privilege",
            Self::Config(_) => "config",
            Self::Locked { .. } => "locked",
            Self::Archive(_) => "archive",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, BootError>;

// SPDX-License-Identifier: PMPL-1.0-or-later

//! Unified error handling for the assimilation pipeline
//!
//! Every failure the analysis, instrumentation and persistence layers can
//! produce maps onto one of these variants. The orchestrator converts them
//! into a structured run failure instead of propagating them to the caller.

use std::io;
use thiserror::Error;

/// Main error type for assimilation operations
#[derive(Debug, Error)]
pub enum AssimilateError {
    /// Upload is not a ZIP container or lacks its required manifest entry
    #[error("Container parse error: {0}")]
    ContainerParse(String),

    /// Declared package type is neither `apk` nor `ios`
    #[error("Unsupported package type '{0}'")]
    UnsupportedPlatform(String),

    /// A required external tool could not be located by any resolution step
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// External tool ran but exited unsuccessfully
    #[error("{tool} failed (exit {status:?}): {stderr_tail}")]
    ToolFailed {
        tool: String,
        status: Option<i32>,
        stderr_tail: String,
    },

    /// External tool exceeded its deadline and was killed
    #[error("{tool} did not finish within {timeout_secs}s and was killed")]
    Timeout { tool: String, timeout_secs: u64 },

    /// Fetching a fallback tool failed after all attempts
    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    /// Signing could not produce an artifact
    #[error("Signing error: {0}")]
    Signing(String),

    /// A pipeline stage failed for a reason other than the above
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },

    /// Snapshot or database write failed (never fatal for a run)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Record with given id does not exist
    #[error("App '{0}' not found")]
    NotFound(String),

    /// Requester does not own the record
    #[error("User '{requester}' may not access app '{app_id}'")]
    AccessDenied { app_id: String, requester: String },

    /// Caller supplied an unusable argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored artifact no longer matches its recorded hash
    #[error("Integrity check failed for '{path}': expected {expected}, found {actual}")]
    IntegrityMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// File I/O error
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Generic error for cases not covered above
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for assimilation operations
pub type Result<T> = std::result::Result<T, AssimilateError>;

impl AssimilateError {
    /// Strategy chains only move on to the next step for this kind
    pub fn is_tool_not_found(&self) -> bool {
        matches!(self, AssimilateError::ToolNotFound(_))
    }

    /// Check if retrying the same operation later could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AssimilateError::Timeout { .. }
                | AssimilateError::Download { .. }
                | AssimilateError::Persistence(_)
        )
    }

    /// Short machine-readable kind, stored alongside run failures
    pub fn kind(&self) -> &'static str {
        match self {
            AssimilateError::ContainerParse(_) => "container_parse",
            AssimilateError::UnsupportedPlatform(_) => "unsupported_platform",
            AssimilateError::ToolNotFound(_) => "tool_not_found",
            AssimilateError::ToolFailed { .. } => "tool_failed",
            AssimilateError::Timeout { .. } => "timeout",
            AssimilateError::Download { .. } => "download",
            AssimilateError::Signing(_) => "signing",
            AssimilateError::Stage { .. } => "stage",
            AssimilateError::Persistence(_) => "persistence",
            AssimilateError::NotFound(_) => "not_found",
            AssimilateError::AccessDenied { .. } => "access_denied",
            AssimilateError::InvalidInput(_) => "invalid_input",
            AssimilateError::IntegrityMismatch { .. } => "integrity",
            AssimilateError::Io { .. } => "io",
            AssimilateError::Other(_) => "other",
        }
    }

    pub fn from_io_error(path: impl Into<String>, error: io::Error) -> Self {
        AssimilateError::Io {
            path: path.into(),
            source: error,
        }
    }

    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        AssimilateError::Stage {
            stage,
            message: message.into(),
        }
    }
}

impl From<zip::result::ZipError> for AssimilateError {
    fn from(error: zip::result::ZipError) -> Self {
        AssimilateError::ContainerParse(error.to_string())
    }
}

impl From<rusqlite::Error> for AssimilateError {
    fn from(error: rusqlite::Error) -> Self {
        AssimilateError::Persistence(format!("sqlite: {}", error))
    }
}

impl From<serde_json::Error> for AssimilateError {
    fn from(error: serde_json::Error) -> Self {
        AssimilateError::Persistence(format!("json: {}", error))
    }
}

//! Error types for the patchpilot core.

use std::path::PathBuf;

/// Top-level error enum for the index, patch and iteration components.
#[derive(Debug, thiserror::Error)]
pub enum PilotError {
    #[error("Failed to parse {path}: {reason}")]
    IndexParse { path: PathBuf, reason: String },

    #[error("Index has not been built (or was built by an incompatible version): {0}")]
    IndexNotBuilt(String),

    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Patch target outside repo: {path} ({reason})")]
    PatchSafety { path: String, reason: String },

    #[error("Patch apply failed: {0}")]
    PatchApply(String),

    #[error("Failed to start `{command}`: {source}")]
    ProcessExecution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PilotError {
    /// Whether this error only invalidates the current patch attempt.
    pub fn is_patch_failure(&self) -> bool {
        matches!(self, PilotError::PatchSafety { .. } | PilotError::PatchApply(_))
    }
}

pub type Result<T> = std::result::Result<T, PilotError>;

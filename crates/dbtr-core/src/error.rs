//! Error types for dbtr-core.

use std::path::Path;

use thiserror::Error;

use crate::artifact::PlacementFailure;
use crate::run::RunStatus;

/// Result type for dbtr-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dbtr-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The uploaded bundle is not a valid zip archive.
    #[error("corrupt archive {name}: {message}")]
    CorruptArchive { name: String, message: String },

    /// IO error during extraction, placement or storage.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A file could not be placed and fail-fast was requested.
    #[error("placement failed: {0}")]
    Placement(PlacementFailure),

    /// Placement did not land every file; the run was not started.
    #[error("project for run {run_id} is incomplete: {failed} failed, {pending} still pending")]
    IncompleteProject {
        run_id: String,
        failed: usize,
        pending: usize,
    },

    /// A run id was issued twice.
    #[error("run {0} already exists")]
    DuplicateRun(String),

    /// The execution lock could not be acquired.
    #[error("failed to acquire execution lock '{resource}': {message}")]
    LockAcquisition { resource: String, message: String },

    /// Run or run configuration not found.
    #[error("run {0} not found")]
    NotFound(String),

    /// A status update would move a run backwards in its lifecycle.
    #[error("invalid status transition for run {run_id}: {from} -> {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The transformation engine raised instead of reporting an outcome.
    #[error("engine error: {0}")]
    Engine(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected failure while orchestrating a run. The run row has been
    /// marked `server-error` before this is returned.
    #[error("server error in run {run_id}: {source}")]
    Server {
        run_id: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Build a `CorruptArchive` error for the named bundle.
    pub fn corrupt_archive(name: impl Into<String>, message: impl ToString) -> Self {
        Self::CorruptArchive {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Wrap an IO error with the path it happened at.
    pub fn io_at(path: &Path, e: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    }

    /// Whether this error leaves a run in `server-error`.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

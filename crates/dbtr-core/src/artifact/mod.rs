//! Artifact ingestion: uploaded project bundles to project directories.
//!
//! # Pipeline
//!
//! ```text
//! upload stream
//!     │
//!     └── extract ──► scratch dir (zip deleted after unpacking)
//!                        │
//!                        └── place (move, bounded workers) ──► project dir
//! ```
//!
//! [`unpack_and_persist`] composes both steps and disposes of the scratch
//! area on every exit path, once no transfer reads from it any more.
//! [`place`] is also usable on its own with copy semantics for re-syncing a
//! tree while keeping the source.

mod extract;
mod place;

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use extract::extract;
pub use place::place;

/// Default number of placement workers.
pub const DEFAULT_MAX_WORKERS: usize = 64;

/// Options for [`place`].
#[derive(Debug, Clone)]
pub struct PlacementOptions {
    /// Move files instead of copying them.
    pub move_semantics: bool,
    /// Upper bound on concurrent transfers.
    pub max_workers: usize,
    /// How long the caller waits for transfers. Transfers still running at
    /// the deadline keep going in the background.
    pub deadline: Option<Duration>,
    /// Return the first per-file failure as an error instead of reporting it.
    pub fail_fast: bool,
}

impl Default for PlacementOptions {
    fn default() -> Self {
        Self {
            move_semantics: false,
            max_workers: DEFAULT_MAX_WORKERS,
            deadline: None,
            fail_fast: false,
        }
    }
}

/// Classification of a per-file placement error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementErrorKind {
    PermissionDenied,
    NotFound,
    AlreadyExists,
    StorageFull,
    Other,
}

impl From<std::io::ErrorKind> for PlacementErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind;
        match kind {
            ErrorKind::PermissionDenied => Self::PermissionDenied,
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::AlreadyExists => Self::AlreadyExists,
            ErrorKind::StorageFull => Self::StorageFull,
            _ => Self::Other,
        }
    }
}

/// A file that could not be placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementFailure {
    /// Path relative to the source root.
    pub path: PathBuf,
    pub kind: PlacementErrorKind,
    pub message: String,
}

impl fmt::Display for PlacementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}): {}", self.path.display(), self.kind, self.message)
    }
}

/// Result of a [`place`] call. All lists are in enumeration order and hold
/// paths relative to the source root.
#[derive(Debug, Clone, Default)]
pub struct PlacementReport {
    pub destination: PathBuf,
    pub placed: Vec<PathBuf>,
    pub failures: Vec<PlacementFailure>,
    /// Files whose transfer had not finished when the deadline elapsed.
    pub pending: Vec<PathBuf>,
}

impl PlacementReport {
    /// Whether every file was placed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.pending.is_empty()
    }
}

/// Extract a bundle into a scratch area and move its files into
/// `destination`.
///
/// `options.move_semantics` is forced on. The scratch area is removed
/// before returning, or, when the deadline left transfers running, as soon
/// as the last of them finishes. Callers must check
/// [`PlacementReport::is_complete`] before using `destination`.
pub fn unpack_and_persist(
    bundle: impl Read,
    filename: &str,
    destination: &Path,
    options: &PlacementOptions,
) -> Result<PlacementReport> {
    let scratch = tempfile::Builder::new().prefix("dbtr-unpack-").tempdir()?;
    let unpacked = extract(bundle, filename, scratch.path())?;

    let options = PlacementOptions {
        move_semantics: true,
        ..options.clone()
    };
    let (report, outstanding) = place::dispatch(&unpacked, destination, &options)?;

    if let Some(outstanding) = outstanding {
        tracing::warn!(
            "{} files of {} still moving after deadline; keeping scratch area until they land",
            report.pending.len(),
            filename
        );
        outstanding.finish_in_background(scratch);
    }
    tracing::info!(
        "Unpacked {} ({} files) into {}",
        filename,
        report.placed.len(),
        destination.display()
    );
    place::check(report, &options)
}

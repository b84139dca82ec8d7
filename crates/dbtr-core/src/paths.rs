//! Executor workspace layout.
//!
//! Keeps the server and the CLI agreeing on where projects and state live.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory structure of an executor workspace:
///
/// ```text
/// <root>/
/// ├── projects/   # one unpacked project per run id
/// └── state/      # run store database
/// ```
#[derive(Debug, Clone)]
pub struct WorkspaceDirs {
    /// The workspace root.
    pub root: PathBuf,

    /// Parent of the per-run project directories.
    pub projects_dir: PathBuf,

    /// State directory holding the run database.
    pub state_dir: PathBuf,
}

impl WorkspaceDirs {
    /// Create (if needed) the workspace rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let projects_dir = root.join("projects");
        let state_dir = root.join("state");

        fs::create_dir_all(&projects_dir).map_err(|e| Error::io_at(&projects_dir, e))?;
        fs::create_dir_all(&state_dir).map_err(|e| Error::io_at(&state_dir, e))?;

        Ok(Self {
            root,
            projects_dir,
            state_dir,
        })
    }

    /// Project directory owned by `run_id`.
    ///
    /// Run ids are generator-issued; anything that is not a single plain
    /// path component is rejected.
    pub fn project_dir(&self, run_id: &str) -> Result<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && run_id != "."
            && run_id != "..";
        if !valid {
            return Err(Error::InvalidConfig(format!("invalid run id '{}'", run_id)));
        }
        Ok(self.projects_dir.join(run_id))
    }

    /// Create the project directory for `run_id`, failing if it exists.
    ///
    /// Creation is atomic, so at most one caller owns a given run id even
    /// across processes sharing the workspace.
    pub fn claim_project_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.project_dir(run_id)?;
        match fs::create_dir(&dir) {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::DuplicateRun(run_id.to_string()))
            }
            Err(e) => Err(Error::io_at(&dir, e)),
        }
    }

    /// Default location of the SQLite run database.
    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("runs.db")
    }
}

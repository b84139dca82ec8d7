//! Persistence of run rows and run configuration.
//!
//! [`RunStore`] is the contract the executor writes through. Every call
//! touches a single row keyed by run id, so stores only need row-level
//! isolation between concurrent executors.

mod memory;
mod sqlite;

use crate::error::{Error, Result};
use crate::run::{Run, RunConfiguration, RunStatus, RunUpdate};

pub use memory::MemoryRunStore;
pub use sqlite::SqliteRunStore;

/// Storage contract for runs.
pub trait RunStore: Send + Sync {
    /// Insert a new run row. Fails if the id already exists.
    fn insert_run(&self, run: &Run) -> Result<()>;

    /// Apply a status update to an existing run.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown run, [`Error::InvalidTransition`]
    /// if the status would not move forward.
    fn update_run(&self, run_id: &str, update: &RunUpdate) -> Result<()>;

    /// Fetch a run row.
    fn fetch_run(&self, run_id: &str) -> Result<Run>;

    /// Write the configuration a run was submitted with.
    fn persist_run_config(&self, config: &RunConfiguration) -> Result<()>;

    /// Fetch a run's configuration ([`Error::NotFound`] if absent).
    fn fetch_run_config(&self, run_id: &str) -> Result<RunConfiguration>;
}

/// Shared status check used by every store before writing an update.
pub(crate) fn check_transition(run_id: &str, from: RunStatus, to: RunStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            run_id: run_id.to_string(),
            from,
            to,
        })
    }
}

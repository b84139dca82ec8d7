//! Scoped ownership of a run row.

use crate::error::Result;
use crate::run::{Run, RunStatus, RunUpdate};
use crate::store::RunStore;

/// Owns a run row from insertion until a terminal status is written.
///
/// If the guard is dropped before [`finish`](Self::finish) succeeded,
/// including while unwinding from a panic, the run is marked
/// `server-error` with its end time set.
pub struct RunGuard<'a> {
    store: &'a dyn RunStore,
    run_id: String,
    status: RunStatus,
    finished: bool,
}

impl<'a> RunGuard<'a> {
    /// Insert `run` and take ownership of its row.
    pub fn begin(store: &'a dyn RunStore, run: Run) -> Result<Self> {
        store.insert_run(&run)?;
        Ok(Self {
            store,
            run_id: run.run_id,
            status: run.status,
            finished: false,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Last status written through this guard.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Move to a non-terminal status.
    pub fn advance(&mut self, status: RunStatus) -> Result<()> {
        self.store.update_run(&self.run_id, &RunUpdate::status(status))?;
        tracing::debug!("Run {} is {}", self.run_id, status);
        self.status = status;
        Ok(())
    }

    /// Write a terminal status and release the row.
    pub fn finish(&mut self, status: RunStatus) -> Result<()> {
        self.store
            .update_run(&self.run_id, &RunUpdate::finished(status))?;
        tracing::debug!("Run {} finished as {}", self.run_id, status);
        self.status = status;
        self.finished = true;
        Ok(())
    }

    /// Mark the run `server-error`. A failure to persist is logged, since
    /// the caller is already handling a more important error.
    pub fn abort(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self
            .store
            .update_run(&self.run_id, &RunUpdate::finished(RunStatus::ServerError))
        {
            Ok(()) => self.status = RunStatus::ServerError,
            Err(e) => tracing::error!(
                "Failed to record server error for run {}: {}",
                self.run_id,
                e
            ),
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Run {} abandoned in {}", self.run_id, self.status);
            self.abort();
        }
    }
}

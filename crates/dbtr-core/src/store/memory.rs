//! In-memory run store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::run::{Run, RunConfiguration, RunUpdate};

use super::{RunStore, check_transition};

#[derive(Default)]
struct Tables {
    runs: HashMap<String, Run>,
    configs: HashMap<String, RunConfiguration>,
}

/// Run store backed by process memory. Rows are lost on exit.
#[derive(Default)]
pub struct MemoryRunStore {
    tables: Mutex<Tables>,
}

fn lock_error<T>(e: PoisonError<T>) -> Error {
    Error::Storage(format!("store lock poisoned (thread panicked): {}", e))
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(lock_error)
    }

    /// Every run currently stored.
    pub fn runs(&self) -> Result<Vec<Run>> {
        Ok(self.tables()?.runs.values().cloned().collect())
    }
}

impl RunStore for MemoryRunStore {
    fn insert_run(&self, run: &Run) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.runs.contains_key(&run.run_id) {
            return Err(Error::Storage(format!("run {} already exists", run.run_id)));
        }
        tables.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn update_run(&self, run_id: &str, update: &RunUpdate) -> Result<()> {
        let mut tables = self.tables()?;
        let run = tables
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(run_id.to_string()))?;
        check_transition(run_id, run.status, update.status)?;

        run.status = update.status;
        if update.end_time.is_some() {
            run.end_time = update.end_time;
        }
        Ok(())
    }

    fn fetch_run(&self, run_id: &str) -> Result<Run> {
        self.tables()?
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(run_id.to_string()))
    }

    fn persist_run_config(&self, config: &RunConfiguration) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.configs.contains_key(&config.run_id) {
            return Err(Error::Storage(format!(
                "configuration for run {} already exists",
                config.run_id
            )));
        }
        tables.configs.insert(config.run_id.clone(), config.clone());
        Ok(())
    }

    fn fetch_run_config(&self, run_id: &str) -> Result<RunConfiguration> {
        self.tables()?
            .configs
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(run_id.to_string()))
    }
}

//! Ingest a bundle and execute it as a new run.

use std::io::Read;

use crate::artifact::{PlacementOptions, unpack_and_persist};
use crate::engine::ProjectRunner;
use crate::error::{Error, Result};
use crate::paths::WorkspaceDirs;
use crate::run::RunConfiguration;

use super::executor::{RunExecutor, RunOutcome, RunRequest};

/// A run submitted with its project bundle.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Upload name of the bundle.
    pub filename: String,
    /// Engine command to execute.
    pub command: Vec<String>,
    /// Configuration to persist; its `run_id` names the run.
    pub config: RunConfiguration,
}

impl<R: ProjectRunner> RunExecutor<R> {
    /// Claim the run's project directory, unpack `bundle` into it, persist
    /// the run configuration, then [`execute`](Self::execute) the run.
    ///
    /// Ingestion errors (`DuplicateRun`, `CorruptArchive`, `Io`,
    /// `Placement`, `IncompleteProject`) are returned as-is: no run row
    /// exists yet at that point. A run only starts on a project whose every
    /// file was placed.
    pub fn submit(
        &self,
        bundle: impl Read,
        submission: Submission,
        workspace: &WorkspaceDirs,
        placement: &PlacementOptions,
    ) -> Result<RunOutcome> {
        let run_id = submission.config.run_id.clone();
        if submission.command.is_empty() {
            return Err(Error::InvalidConfig("empty command".to_string()));
        }

        let project_dir = workspace.claim_project_dir(&run_id)?;
        let report = unpack_and_persist(bundle, &submission.filename, &project_dir, placement)?;
        if !report.is_complete() {
            tracing::error!(
                "Refusing to start run {}: {} files failed, {} still pending",
                run_id,
                report.failures.len(),
                report.pending.len()
            );
            return Err(Error::IncompleteProject {
                run_id,
                failed: report.failures.len(),
                pending: report.pending.len(),
            });
        }

        self.store().persist_run_config(&submission.config)?;

        let request = RunRequest {
            run_id,
            project: submission.config.project.clone(),
            command: submission.command,
            runtime_config: submission.config.dbt_runtime_config,
            project_dir,
        };
        self.execute(&request)
    }
}

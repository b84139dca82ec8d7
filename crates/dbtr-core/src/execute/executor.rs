//! Run executor: the lifecycle of one run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::engine::{CommandParams, ParseOutcome, ProjectRunner};
use crate::error::{Error, Result};
use crate::lock::ExecutionLock;
use crate::run::{Run, RunStatus};
use crate::store::RunStore;

use super::guard::RunGuard;
use super::params::{log_overlay, merged, parse_log_overlay, prepare_params, project_params};

/// Package manifest that triggers a `deps` step before the command.
const PACKAGES_FILE: &str = "packages.yml";

/// Everything needed to execute one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: String,
    pub project: Option<String>,
    /// Engine command, e.g. `["run", "--full-refresh"]`.
    pub command: Vec<String>,
    /// Submitted engine parameters (JSON object or null).
    pub runtime_config: serde_json::Value,
    /// Unpacked project owned by this run.
    pub project_dir: PathBuf,
}

/// Why a run ended in `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "detail", rename_all = "snake_case")]
pub enum RunFailure {
    /// The engine reported that the project does not compile.
    Compile(String),
    /// The engine reported that the command failed.
    Execution(String),
}

impl RunFailure {
    pub fn detail(&self) -> &str {
        match self {
            Self::Compile(detail) | Self::Execution(detail) => detail,
        }
    }
}

/// Structured result of a run that reached `success` or `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl RunOutcome {
    fn success(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Success,
            failure: None,
        }
    }

    fn failed(run_id: &str, failure: RunFailure) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Failed,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Executes runs against an engine, persisting each status transition.
///
/// ```text
/// initializing ──(lock: parse)──► running ──(invoke)──► success | failed
///       │
///       └── parse reported failure ──► failed
///  any unexpected error ──► server-error (returned as Error::Server)
/// ```
///
/// Concurrent `execute` calls are safe: they share only the store and the
/// execution lock, which serializes the parse step.
pub struct RunExecutor<R: ProjectRunner> {
    runner: R,
    store: Arc<dyn RunStore>,
    lock: ExecutionLock,
}

impl<R: ProjectRunner> RunExecutor<R> {
    pub fn new(runner: R, store: Arc<dyn RunStore>, lock: ExecutionLock) -> Self {
        Self {
            runner,
            store,
            lock,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn lock(&self) -> &ExecutionLock {
        &self.lock
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Execute one run to a terminal status.
    ///
    /// Returns the outcome for `success` and `failed` runs. Any other
    /// failure marks the run `server-error` and is returned as
    /// [`Error::Server`].
    pub fn execute(&self, request: &RunRequest) -> Result<RunOutcome> {
        let span = tracing::info_span!("run", run_id = %request.run_id);
        let _enter = span.enter();
        let started = Instant::now();

        let run = Run::initializing(&request.run_id, request.project.clone());
        let mut guard =
            RunGuard::begin(self.store.as_ref(), run).map_err(|e| server_error(request, e))?;

        let result = self
            .drive(&mut guard, request)
            .and_then(|outcome| guard.finish(outcome.status).map(|()| outcome));

        match result {
            Ok(outcome) => {
                match &outcome.failure {
                    None => tracing::info!(
                        "Command {:?} completed in {:.2}s",
                        request.command,
                        started.elapsed().as_secs_f64()
                    ),
                    Some(failure) => tracing::warn!(
                        "Command {:?} failed: {:?}",
                        request.command,
                        failure
                    ),
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("Failed to execute command {:?}: {}", request.command, e);
                guard.abort();
                Err(server_error(request, e))
            }
        }
    }

    fn drive(&self, guard: &mut RunGuard<'_>, request: &RunRequest) -> Result<RunOutcome> {
        let params = prepare_params(&request.runtime_config, &request.project_dir)?;

        let compiled = match self.build(&request.project_dir, &params)? {
            ParseOutcome::Parsed(compiled) => compiled,
            ParseOutcome::Failed(detail) => {
                return Ok(RunOutcome::failed(&request.run_id, RunFailure::Compile(detail)));
            }
        };

        guard.advance(RunStatus::Running)?;

        if has_packages(&request.project_dir) {
            tracing::info!("Installing package dependencies");
            let deps_params = merged(&project_params(&params), &log_overlay());
            let deps = self
                .runner
                .invoke(&["deps".to_string()], &compiled, &deps_params)?;
            if !deps.success {
                let detail = deps
                    .exception
                    .unwrap_or_else(|| "dependency installation failed".to_string());
                return Ok(RunOutcome::failed(&request.run_id, RunFailure::Execution(detail)));
            }
        }

        tracing::info!(
            "Executing command {:?} with project {}",
            request.command,
            request.project_dir.display()
        );
        let params = merged(&params, &log_overlay());
        let result = self.runner.invoke(&request.command, &compiled, &params)?;
        if result.success {
            Ok(RunOutcome::success(&request.run_id))
        } else {
            let detail = result
                .exception
                .unwrap_or_else(|| "command failed".to_string());
            Ok(RunOutcome::failed(&request.run_id, RunFailure::Execution(detail)))
        }
    }

    /// Build the compiled representation while holding the execution lock.
    ///
    /// Only project-level options reach the parse step.
    ///
    /// The token is released right after the parse call returns; if the
    /// call unwinds, dropping the token releases it.
    fn build(&self, project_dir: &Path, params: &CommandParams) -> Result<ParseOutcome<R::Compiled>> {
        let params = merged(&project_params(params), &parse_log_overlay());
        let mut token = self.lock.acquire()?;
        tracing::info!("Building manifest");
        let started = Instant::now();
        let result = self.runner.parse(project_dir, project_dir, &params);
        token.release();
        tracing::debug!("Manifest build took {:.2}s", started.elapsed().as_secs_f64());
        result
    }
}

fn server_error(request: &RunRequest, source: Error) -> Error {
    Error::Server {
        run_id: request.run_id.clone(),
        source: Box::new(source),
    }
}

/// Whether the project declares packages to install.
fn has_packages(project_dir: &Path) -> bool {
    fs::read_to_string(project_dir.join(PACKAGES_FILE))
        .map(|contents| !contents.trim().is_empty())
        .unwrap_or(false)
}

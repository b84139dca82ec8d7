//! Run command implementation for dbtr CLI.
//!
//! Executes a bundle in-process as a single run, without a server.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use dbtr_core::{
    DbtCommandRunner, ExecutionLock, IdGenerator, PlacementOptions, RunConfiguration, RunExecutor,
    RunStore, SqliteRunStore, Submission, WorkspaceDirs,
};
use serde_json::Value;

use crate::colors;

/// Execute a bundle as one run.
///
/// Fails (non-zero exit) unless the run ends in `success`.
pub fn execute(
    bundle: &Path,
    command: Vec<String>,
    config_path: Option<&Path>,
    workspace: &Path,
    engine: &Path,
    ids: &IdGenerator,
) -> anyhow::Result<()> {
    let start = Instant::now();

    let file =
        File::open(bundle).with_context(|| format!("Bundle not found: {}", bundle.display()))?;
    let filename = bundle
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "bundle.zip".to_string());

    let workspace = WorkspaceDirs::from_root(workspace)?;
    let store: Arc<dyn RunStore> = Arc::new(SqliteRunStore::open(workspace.database_path())?);
    let executor = RunExecutor::new(
        DbtCommandRunner::new(engine),
        store,
        ExecutionLock::new(dbtr_server::COMPILE_LOCK),
    );

    let run_id = ids.next_id(None);
    let config = load_config(&run_id, config_path)?;

    println!(
        "\n{}Running{} {} {}({}){}",
        colors::BOLD,
        colors::RESET,
        command.join(" "),
        colors::CYAN,
        run_id,
        colors::RESET
    );
    println!("{}", "─".repeat(50));

    let submission = Submission {
        filename,
        command,
        config,
    };
    let placement = PlacementOptions {
        fail_fast: true,
        ..Default::default()
    };
    let outcome = executor.submit(file, submission, &workspace, &placement)?;

    let elapsed = start.elapsed().as_secs_f64();
    match &outcome.failure {
        None => {
            println!(
                "{}Completed{} run {} in {:.2}s",
                colors::GREEN,
                colors::RESET,
                outcome.run_id,
                elapsed
            );
            Ok(())
        }
        Some(failure) => {
            println!(
                "{}Failed{} run {} in {:.2}s",
                colors::RED,
                colors::RESET,
                outcome.run_id,
                elapsed
            );
            println!("{}", failure.detail());
            anyhow::bail!("run {} failed", outcome.run_id)
        }
    }
}

/// Read run configuration fields from `path`; the generated id always wins.
fn load_config(run_id: &str, path: Option<&Path>) -> anyhow::Result<RunConfiguration> {
    let Some(path) = path else {
        return Ok(RunConfiguration::new(run_id, Value::Null));
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let mut fields = match serde_json::from_str::<Value>(&raw)? {
        Value::Object(fields) => fields,
        _ => anyhow::bail!("Config {} must be a JSON object", path.display()),
    };
    fields.insert("run_id".to_string(), Value::String(run_id.to_string()));
    let config = serde_json::from_value(Value::Object(fields))
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

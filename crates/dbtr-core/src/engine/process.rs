//! Engine runner that drives an external `dbt` executable.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

use crate::error::{Error, Result};

use super::{CommandParams, InvokeOutcome, ParseOutcome, ProjectRunner};

/// Lines of engine output kept in a failure detail.
const DETAIL_LINES: usize = 20;

/// Manifest produced by `dbt parse`, used as the compiled representation.
#[derive(Debug, Clone)]
pub struct CompiledManifest {
    pub project_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Value,
}

impl CompiledManifest {
    /// Number of nodes in the manifest graph.
    pub fn node_count(&self) -> usize {
        self.manifest
            .get("nodes")
            .and_then(Value::as_object)
            .map(|nodes| nodes.len())
            .unwrap_or(0)
    }
}

/// Runs engine commands as child processes of a `dbt` binary.
#[derive(Debug, Clone)]
pub struct DbtCommandRunner {
    binary: PathBuf,
}

impl Default for DbtCommandRunner {
    fn default() -> Self {
        Self::new("dbt")
    }
}

impl DbtCommandRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn run(&self, args: &[String], cwd: &Path) -> Result<Output> {
        tracing::debug!("Running {} {}", self.binary.display(), args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| Error::Engine(format!("failed to run {}: {}", self.binary.display(), e)))
    }
}

/// Render parameters as `--flag value` arguments.
///
/// `snake_case` keys become `--kebab-case` flags. `true` renders as a bare
/// flag; `false`, null and empty lists are omitted; lists repeat their
/// items after one flag; objects are passed as JSON.
pub fn render_args(params: &CommandParams) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in params {
        let flag = format!("--{}", key.replace('_', "-"));
        match value {
            Value::Null | Value::Bool(false) => {}
            Value::Bool(true) => args.push(flag),
            Value::String(s) => {
                args.push(flag);
                args.push(s.clone());
            }
            Value::Number(n) => {
                args.push(flag);
                args.push(n.to_string());
            }
            Value::Array(items) => {
                if items.is_empty() {
                    continue;
                }
                args.push(flag);
                args.extend(items.iter().map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }));
            }
            Value::Object(_) => {
                args.push(flag);
                args.push(value.to_string());
            }
        }
    }
    args
}

/// Tail of the engine's output, preferring stderr.
fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout)
    } else {
        stderr
    };
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(DETAIL_LINES);
    let detail = lines[start..].join("\n");
    if detail.is_empty() {
        format!("engine exited with {}", output.status)
    } else {
        detail
    }
}

impl ProjectRunner for DbtCommandRunner {
    type Compiled = CompiledManifest;

    fn parse(
        &self,
        project_dir: &Path,
        profiles_dir: &Path,
        params: &CommandParams,
    ) -> Result<ParseOutcome<CompiledManifest>> {
        let mut params = params.clone();
        params
            .entry("project_dir")
            .or_insert_with(|| Value::String(project_dir.display().to_string()));
        params
            .entry("profiles_dir")
            .or_insert_with(|| Value::String(profiles_dir.display().to_string()));

        let mut args = vec!["parse".to_string()];
        args.extend(render_args(&params));
        let output = self.run(&args, project_dir)?;
        if !output.status.success() {
            return Ok(ParseOutcome::Failed(failure_detail(&output)));
        }

        let target = params
            .get("target_path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("target"));
        let manifest_path = project_dir.join(target).join("manifest.json");
        let raw = fs::read_to_string(&manifest_path).map_err(|e| {
            Error::Engine(format!(
                "parse succeeded but {} is unreadable: {}",
                manifest_path.display(),
                e
            ))
        })?;
        let manifest: Value = serde_json::from_str(&raw)?;

        Ok(ParseOutcome::Parsed(CompiledManifest {
            project_dir: project_dir.to_path_buf(),
            manifest_path,
            manifest,
        }))
    }

    fn invoke(
        &self,
        command: &[String],
        compiled: &CompiledManifest,
        params: &CommandParams,
    ) -> Result<InvokeOutcome> {
        let mut args = command.to_vec();
        args.extend(render_args(params));
        let output = self.run(&args, &compiled.project_dir)?;
        if output.status.success() {
            Ok(InvokeOutcome::succeeded())
        } else {
            Ok(InvokeOutcome::failed(failure_detail(&output)))
        }
    }
}

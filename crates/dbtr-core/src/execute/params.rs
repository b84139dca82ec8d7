//! Preparation of engine parameters for a run.

use std::path::Path;

use serde_json::Value;

use crate::engine::CommandParams;
use crate::error::{Error, Result};

/// Options that are never forwarded to the engine.
const DROPPED_KEYS: &[&str] = &["warn_error_options", "args"];

/// Options describing the project rather than the command being run.
const PROJECT_KEYS: &[&str] = &[
    "project_dir",
    "profiles_dir",
    "profile",
    "target",
    "target_path",
    "vars",
];

/// Logging options applied to every engine invocation.
pub fn log_overlay() -> CommandParams {
    let mut overlay = CommandParams::new();
    overlay.insert("log_format_file".into(), Value::from("json"));
    overlay.insert("log_level".into(), Value::from("none"));
    overlay.insert("log_level_file".into(), Value::from("debug"));
    overlay
}

/// Logging options for the parse step, which keeps no log file.
pub fn parse_log_overlay() -> CommandParams {
    let mut overlay = log_overlay();
    overlay.insert("log_level_file".into(), Value::from("none"));
    overlay
}

/// `base` with every entry of `overlay` written over it.
pub fn merged(base: &CommandParams, overlay: &CommandParams) -> CommandParams {
    let mut out = base.clone();
    out.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

/// The subset of `params` that `parse` and `deps` accept: project location,
/// profile and target, `vars` and `log_*` options.
///
/// Command options such as `select`, `full_refresh` or `threads` belong to
/// the submitted command only.
pub fn project_params(params: &CommandParams) -> CommandParams {
    params
        .iter()
        .filter(|(key, _)| PROJECT_KEYS.contains(&key.as_str()) || key.starts_with("log_"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Turn a submitted runtime configuration into engine parameters for a
/// project unpacked at `project_dir`.
///
/// - keys starting with `deprecated`, `warn_error_options` and `args` are
///   dropped;
/// - `project_dir` and `profiles_dir`, when present, point at `project_dir`;
/// - missing, null or empty `select` / `exclude` become empty lists.
///
/// # Errors
/// [`Error::InvalidConfig`] if `runtime_config` is neither an object nor null.
pub fn prepare_params(runtime_config: &Value, project_dir: &Path) -> Result<CommandParams> {
    let source = match runtime_config {
        Value::Object(map) => map.clone(),
        Value::Null => CommandParams::new(),
        other => {
            return Err(Error::InvalidConfig(format!(
                "runtime configuration must be an object, got {}",
                other
            )));
        }
    };

    let mut params: CommandParams = source
        .iter()
        .filter(|(key, _)| !key.starts_with("deprecated") && !DROPPED_KEYS.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let project = Value::String(project_dir.display().to_string());
    for key in ["project_dir", "profiles_dir"] {
        if source.contains_key(key) {
            params.insert(key.to_string(), project.clone());
        }
    }

    for key in ["select", "exclude"] {
        if is_empty_selection(source.get(key)) {
            params.insert(key.to_string(), Value::Array(Vec::new()));
        }
    }

    Ok(params)
}

fn is_empty_selection(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Bool(b)) => !b,
        Some(_) => false,
    }
}

//! HTTP routes for the dbtr server.

use std::io::Cursor;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use dbtr_core::{
    IdGenerator, PlacementOptions, ProjectRunner, RunConfiguration, RunExecutor, Submission,
    WorkspaceDirs,
};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{ServerError, ServerResult};

/// Upload name used when the artifact part carries none.
const DEFAULT_BUNDLE_NAME: &str = "bundle.zip";

/// Application state shared across handlers.
pub struct AppState<R: ProjectRunner> {
    /// Executes submitted runs.
    pub executor: Arc<RunExecutor<R>>,
    /// Issues run ids.
    pub ids: Arc<IdGenerator>,
    /// Where run projects are unpacked.
    pub workspace: WorkspaceDirs,
    /// How unpacked files are placed.
    pub placement: PlacementOptions,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
}

/// Create the router with all routes.
pub fn create_router<R: ProjectRunner + 'static>(state: Arc<AppState<R>>) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/run", post(submit_handler::<R>))
        .route("/run/{run_id}", get(run_handler::<R>))
        .route("/run/{run_id}/config", get(config_handler::<R>))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Fields of a `POST /run` form.
#[derive(Debug, Default)]
struct RunForm {
    bundle: Option<(String, Vec<u8>)>,
    command: Option<String>,
    dbt_runtime_config: Option<Value>,
    server_runtime_config: Option<Value>,
}

impl RunForm {
    async fn read(mut multipart: Multipart) -> ServerResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "artifact" => {
                    let filename = field
                        .file_name()
                        .filter(|n| !n.is_empty())
                        .unwrap_or(DEFAULT_BUNDLE_NAME)
                        .to_string();
                    let bytes = field.bytes().await?;
                    form.bundle = Some((filename, bytes.to_vec()));
                }
                "command" => form.command = Some(field.text().await?),
                "dbt_runtime_config" => {
                    form.dbt_runtime_config = Some(json_field(&name, &field.text().await?)?)
                }
                "server_runtime_config" => {
                    form.server_runtime_config = Some(json_field(&name, &field.text().await?)?)
                }
                other => tracing::debug!("Ignoring unknown form field '{}'", other),
            }
        }
        Ok(form)
    }

    /// Turn the form into a submission for `run_id`.
    fn into_submission(self, run_id: &str) -> ServerResult<(Vec<u8>, Submission)> {
        let (filename, bytes) = self
            .bundle
            .ok_or_else(|| ServerError::BadRequest("missing 'artifact' field".to_string()))?;

        let command: Vec<String> = self
            .command
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if command.is_empty() {
            return Err(ServerError::BadRequest("missing 'command' field".to_string()));
        }

        let runtime_config = self.dbt_runtime_config.unwrap_or(Value::Null);
        let config = run_configuration(run_id, self.server_runtime_config, runtime_config)?;

        Ok((
            bytes,
            Submission {
                filename,
                command,
                config,
            },
        ))
    }
}

fn json_field(name: &str, text: &str) -> ServerResult<Value> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ServerError::BadRequest(format!("field '{}' is not JSON: {}", name, e)))?;
    if !value.is_object() {
        return Err(ServerError::BadRequest(format!(
            "field '{}' must be a JSON object",
            name
        )));
    }
    Ok(value)
}

/// Merge the server-side descriptors with the generated id and engine
/// parameters. The generated id always wins.
fn run_configuration(
    run_id: &str,
    server_config: Option<Value>,
    runtime_config: Value,
) -> ServerResult<RunConfiguration> {
    let Some(Value::Object(mut fields)) = server_config else {
        return Ok(RunConfiguration::new(run_id, runtime_config));
    };
    fields.insert("run_id".to_string(), Value::String(run_id.to_string()));
    fields.insert("dbt_runtime_config".to_string(), runtime_config);
    serde_json::from_value(Value::Object(fields)).map_err(|e| {
        ServerError::BadRequest(format!("invalid 'server_runtime_config': {}", e))
    })
}

/// Accept a bundle and execute it as a new run.
async fn submit_handler<R: ProjectRunner + 'static>(
    State(state): State<Arc<AppState<R>>>,
    multipart: Multipart,
) -> ServerResult<Response> {
    let form = RunForm::read(multipart).await?;
    let run_id = state.ids.next_id(None);
    let (bundle, submission) = form.into_submission(&run_id)?;

    tracing::info!(
        "Accepted run {} ({} bytes, command: {})",
        run_id,
        bundle.len(),
        submission.command.join(" ")
    );

    let executor = state.executor.clone();
    let workspace = state.workspace.clone();
    let placement = state.placement.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        executor.submit(Cursor::new(bundle), submission, &workspace, &placement)
    })
    .await??;

    let response = match &outcome.failure {
        None => (
            StatusCode::OK,
            Json(serde_json::json!({
                "run_id": outcome.run_id,
                "status": outcome.status,
            })),
        ),
        Some(failure) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "run_id": outcome.run_id,
                "status": outcome.status,
                "detail": failure.detail(),
            })),
        ),
    };
    Ok(response.into_response())
}

/// Get a run row.
async fn run_handler<R: ProjectRunner + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(run_id): Path<String>,
) -> ServerResult<impl IntoResponse> {
    let store = state.executor.store().clone();
    let run = tokio::task::spawn_blocking(move || store.fetch_run(&run_id)).await??;
    Ok(Json(run))
}

/// Get a run's configuration.
async fn config_handler<R: ProjectRunner + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(run_id): Path<String>,
) -> ServerResult<impl IntoResponse> {
    let store = state.executor.store().clone();
    let config = tokio::task::spawn_blocking(move || store.fetch_run_config(&run_id)).await??;
    Ok(Json(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_configuration_without_server_fields() {
        let config =
            run_configuration("r1", None, serde_json::json!({"select": "a"})).unwrap();
        assert_eq!(config.run_id, "r1");
        assert_eq!(config.project, None);
        assert_eq!(config.dbt_runtime_config["select"], "a");
    }

    #[test]
    fn test_run_configuration_generated_id_wins() {
        let server = serde_json::json!({
            "run_id": "client-chosen",
            "project": "jaffle_shop",
            "requester": "ci",
        });
        let config = run_configuration("r2", Some(server), Value::Null).unwrap();
        assert_eq!(config.run_id, "r2");
        assert_eq!(config.project.as_deref(), Some("jaffle_shop"));
        assert_eq!(config.requester.as_deref(), Some("ci"));
    }

    #[test]
    fn test_run_configuration_rejects_bad_types() {
        let server = serde_json::json!({"project": 42});
        let err = run_configuration("r3", Some(server), Value::Null).unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[test]
    fn test_json_field_requires_object() {
        assert!(json_field("x", "{\"a\": 1}").is_ok());
        assert!(matches!(json_field("x", "[1]"), Err(ServerError::BadRequest(_))));
        assert!(matches!(json_field("x", "nope"), Err(ServerError::BadRequest(_))));
    }

    #[test]
    fn test_form_without_command_is_rejected() {
        let form = RunForm {
            bundle: Some(("b.zip".to_string(), vec![1, 2, 3])),
            command: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            form.into_submission("r4"),
            Err(ServerError::BadRequest(_))
        ));
    }
}

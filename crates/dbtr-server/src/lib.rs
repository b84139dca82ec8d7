//! dbtr remote execution server.
//!
//! Accepts project bundles over HTTP and executes them as runs.
//!
//! # Architecture
//!
//! The server consists of:
//! - **Routes**: HTTP handlers for submission and run lookup
//! - **Executor**: the `dbtr-core` run executor, driven on tokio's blocking pool
//! - **Store**: a SQLite run database under the workspace state directory

pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dbtr_core::{
    DbtCommandRunner, ExecutionLock, IdGenerator, PlacementOptions, RunExecutor, RunStore,
    SqliteRunStore, WorkspaceDirs,
};

pub use error::{ServerError, ServerResult};
pub use routes::{AppState, create_router};

/// Resource name of the lock serializing project builds.
pub const COMPILE_LOCK: &str = "compiler";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Workspace root holding projects and state.
    pub workspace: PathBuf,
    /// Run database; defaults to `<workspace>/state/runs.db`.
    pub database: Option<PathBuf>,
    /// Instance id embedded in generated run ids (0..=1023); derived from
    /// the process id when unset.
    pub instance_id: Option<u16>,
    /// Upper bound on concurrent file placements per run.
    pub max_workers: usize,
    /// How long a submission waits for file placement.
    pub placement_deadline: Option<Duration>,
    /// Engine executable.
    pub engine_binary: PathBuf,
    /// Largest accepted upload.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8580,
            workspace: PathBuf::from(".dbtr"),
            database: None,
            instance_id: None,
            max_workers: dbtr_core::artifact::DEFAULT_MAX_WORKERS,
            placement_deadline: None,
            engine_binary: PathBuf::from("dbt"),
            max_upload_bytes: 256 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid by `DBTR_*` environment variables.
    ///
    /// Unset variables keep their default; malformed ones are an error.
    pub fn from_env() -> ServerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ServerResult<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup("DBTR_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "DBTR_PORT")? {
            config.port = port;
        }
        if let Some(workspace) = lookup("DBTR_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }
        if let Some(database) = lookup("DBTR_DATABASE") {
            config.database = Some(PathBuf::from(database));
        }
        if let Some(instance_id) = parse_var(&lookup, "DBTR_INSTANCE_ID")? {
            config.instance_id = Some(instance_id);
        }
        if let Some(max_workers) = parse_var(&lookup, "DBTR_MAX_WORKERS")? {
            config.max_workers = max_workers;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "DBTR_PLACEMENT_DEADLINE_SECS")? {
            config.placement_deadline = Some(Duration::from_secs(secs));
        }
        if let Some(engine) = lookup("DBTR_ENGINE") {
            config.engine_binary = PathBuf::from(engine);
        }
        if let Some(bytes) = parse_var(&lookup, "DBTR_MAX_UPLOAD_BYTES")? {
            config.max_upload_bytes = bytes;
        }
        Ok(config)
    }

    /// Placement options for submissions.
    ///
    /// Submissions move files out of their scratch directory and refuse to
    /// start a run whose project is incomplete.
    pub fn placement(&self) -> PlacementOptions {
        PlacementOptions {
            move_semantics: true,
            max_workers: self.max_workers,
            deadline: self.placement_deadline,
            fail_fast: true,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> ServerResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ServerError::Core(dbtr_core::Error::InvalidConfig(format!(
                "{} has an invalid value '{}'",
                key, raw
            )))
        }),
    }
}

/// Build the application state for `config`.
///
/// Creates the workspace and opens the run database.
pub fn build_state(config: &ServerConfig) -> ServerResult<Arc<AppState<DbtCommandRunner>>> {
    let workspace = WorkspaceDirs::from_root(&config.workspace)?;
    let database = config
        .database
        .clone()
        .unwrap_or_else(|| workspace.database_path());
    let store: Arc<dyn RunStore> = Arc::new(SqliteRunStore::open(&database)?);
    tracing::info!("Run database: {}", database.display());

    let runner = DbtCommandRunner::new(&config.engine_binary);
    let executor = RunExecutor::new(runner, store, ExecutionLock::new(COMPILE_LOCK));

    Ok(Arc::new(AppState {
        executor: Arc::new(executor),
        ids: Arc::new(match config.instance_id {
            Some(instance) => IdGenerator::new(instance)?,
            None => IdGenerator::for_process(),
        }),
        workspace,
        placement: config.placement(),
        max_upload_bytes: config.max_upload_bytes,
    }))
}

/// Start the dbtr server.
pub async fn serve(config: ServerConfig) -> ServerResult<()> {
    let state = build_state(&config)?;
    let app = create_router(state);

    // Build address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| ServerError::Io {
            path: PathBuf::new(),
            message: format!("Invalid address: {}:{}", config.host, config.port),
        })?;

    tracing::info!("Starting dbtr server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    // Handle Ctrl+C for graceful shutdown
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8580);
        assert!(config.instance_id.is_none());
        assert!(config.database.is_none());
    }

    #[test]
    fn test_env_overlay() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("DBTR_PORT", "9000"),
            ("DBTR_INSTANCE_ID", "7"),
            ("DBTR_PLACEMENT_DEADLINE_SECS", "30"),
            ("DBTR_ENGINE", "/opt/dbt/bin/dbt"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.instance_id, Some(7));
        assert_eq!(config.placement_deadline, Some(Duration::from_secs(30)));
        assert_eq!(config.engine_binary, PathBuf::from("/opt/dbt/bin/dbt"));
        // Untouched fields keep their defaults.
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_env_overlay_rejects_malformed_values() {
        let result = ServerConfig::from_lookup(lookup(&[("DBTR_PORT", "eighty")]));
        assert!(matches!(
            result,
            Err(ServerError::Core(dbtr_core::Error::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_submission_placement_moves_and_fails_fast() {
        let placement = ServerConfig::default().placement();
        assert!(placement.move_semantics);
        assert!(placement.fail_fast);
    }

    #[test]
    fn test_build_state_creates_workspace() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = ServerConfig {
            workspace: temp.path().join("ws"),
            instance_id: Some(3),
            ..Default::default()
        };

        let state = build_state(&config).unwrap();
        assert!(state.workspace.projects_dir.is_dir());
        assert!(config.workspace.join("state").join("runs.db").is_file());
        assert_eq!(state.ids.instance(), 3);
        assert_eq!(state.executor.lock().resource(), COMPILE_LOCK);
    }
}

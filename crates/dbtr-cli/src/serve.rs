//! Serve command implementation for dbtr CLI.
//!
//! Starts the HTTP server accepting run submissions.

use std::path::PathBuf;

use dbtr_server::ServerConfig;

use crate::colors;

/// Command-line values that override the environment-derived config.
#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub instance_id: Option<u16>,
    pub max_workers: Option<usize>,
    pub engine: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database) = self.database {
            config.database = Some(database);
        }
        if let Some(workspace) = self.workspace {
            config.workspace = workspace;
        }
        if let Some(instance_id) = self.instance_id {
            config.instance_id = Some(instance_id);
        }
        if let Some(max_workers) = self.max_workers {
            config.max_workers = max_workers;
        }
        if let Some(engine) = self.engine {
            config.engine_binary = engine;
        }
        config
    }
}

/// Start the run submission server.
pub async fn execute(overrides: Overrides) -> anyhow::Result<()> {
    let config = overrides.apply(ServerConfig::from_env()?);

    println!("\n{}dbtr Server{} - Remote Run Executor", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    println!(
        "{}  ◆ Workspace:{} {}",
        colors::CYAN,
        colors::RESET,
        config.workspace.display()
    );
    println!(
        "{}  ◆ Engine:{} {}",
        colors::CYAN,
        colors::RESET,
        config.engine_binary.display()
    );
    println!(
        "{}  ◆ Server:{} http://{}:{}",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port
    );
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    dbtr_server::serve(config).await?;

    Ok(())
}

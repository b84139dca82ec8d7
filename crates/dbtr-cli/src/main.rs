//! dbtr CLI - remote execution of dbt project bundles.

mod colors;
mod run;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dbtr")]
#[command(about = "Remote executor for dbt project bundles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the run submission server
    Serve {
        /// Host address to bind to
        #[arg(long, env = "DBTR_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "DBTR_PORT")]
        port: Option<u16>,

        /// Run database (default: <workspace>/state/runs.db)
        #[arg(long, env = "DBTR_DATABASE")]
        db: Option<PathBuf>,

        /// Workspace root for projects and state
        #[arg(long, env = "DBTR_WORKSPACE")]
        workspace: Option<PathBuf>,

        /// Instance id embedded in run ids (0-1023)
        #[arg(long, env = "DBTR_INSTANCE_ID")]
        instance_id: Option<u16>,

        /// Upper bound on concurrent file placements
        #[arg(long, env = "DBTR_MAX_WORKERS")]
        max_workers: Option<usize>,

        /// Engine executable
        #[arg(long, env = "DBTR_ENGINE")]
        engine: Option<PathBuf>,
    },

    /// Execute a bundle locally as a single run
    Run {
        /// Path to the project bundle (.zip)
        bundle: PathBuf,

        /// Engine command, e.g. `run --select orders`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// JSON file with run configuration fields and `dbt_runtime_config`
        #[arg(long)]
        config: Option<PathBuf>,

        /// Workspace root for projects and state
        #[arg(long, default_value = ".dbtr")]
        workspace: PathBuf,

        /// Engine executable
        #[arg(long, default_value = "dbt")]
        engine: PathBuf,

        /// Instance id embedded in the run id (default: derived from the process id)
        #[arg(long, env = "DBTR_INSTANCE_ID")]
        instance_id: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve {
            host,
            port,
            db,
            workspace,
            instance_id,
            max_workers,
            engine,
        } => {
            let overrides = serve::Overrides {
                host,
                port,
                database: db,
                workspace,
                instance_id,
                max_workers,
                engine,
            };
            serve::execute(overrides).await?;
        }

        Commands::Run {
            bundle,
            command,
            config,
            workspace,
            engine,
            instance_id,
        } => {
            let ids = match instance_id {
                Some(instance) => dbtr_core::IdGenerator::new(instance)?,
                None => dbtr_core::IdGenerator::for_process(),
            };
            run::execute(&bundle, command, config.as_deref(), &workspace, &engine, &ids)?;
        }
    }

    Ok(())
}

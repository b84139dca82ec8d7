//! SQLite-backed run store.
//!
//! Tables:
//!
//! ```text
//! Runs(run_id, start_time, end_time, run_status, project)
//! RunConfiguration(run_id, run_conf_version, project, server_url, cloud_provider,
//!                  gcp_location, gcp_project, azure_location, azure_resource_group,
//!                  schedule, schedule_name, requester, cron_schedule, dbt_runtime_config)
//! ```
//!
//! Timestamps are stored as fractional Unix seconds; `dbt_runtime_config`
//! is stored as serialized JSON.
//!
//! The store holds one connection (WAL journal) behind a mutex; concurrent
//! callers take turns on it.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::run::{Run, RunConfiguration, RunStatus, RunUpdate};

use super::{RunStore, check_transition};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS Runs (
        run_id TEXT PRIMARY KEY,
        start_time REAL NOT NULL,
        end_time REAL,
        run_status TEXT NOT NULL,
        project TEXT
    );
    CREATE TABLE IF NOT EXISTS RunConfiguration (
        run_id TEXT PRIMARY KEY,
        run_conf_version INTEGER NOT NULL,
        project TEXT,
        server_url TEXT,
        cloud_provider TEXT,
        gcp_location TEXT,
        gcp_project TEXT,
        azure_location TEXT,
        azure_resource_group TEXT,
        schedule TEXT,
        schedule_name TEXT,
        requester TEXT,
        cron_schedule TEXT,
        dbt_runtime_config TEXT NOT NULL
    );
";

/// Run store persisted in a SQLite database file.
pub struct SqliteRunStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

fn lock_error<T>(e: PoisonError<T>) -> Error {
    Error::Storage(format!("connection lock poisoned (thread panicked): {}", e))
}

fn to_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}

fn from_seconds(seconds: f64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
        .ok_or_else(|| Error::Storage(format!("timestamp {} out of range", seconds)))
}

impl SqliteRunStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::bootstrap(conn, Some(path.to_path_buf()))
    }

    /// Database that lives only as long as this store.
    pub fn in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?, None)
    }

    fn bootstrap(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(
            "Opened run store at {}",
            path.as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string())
        );
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(lock_error)
    }
}

impl RunStore for SqliteRunStore {
    fn insert_run(&self, run: &Run) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO Runs (run_id, start_time, end_time, run_status, project)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.run_id,
                to_seconds(run.start_time),
                run.end_time.map(to_seconds),
                run.status.as_str(),
                run.project,
            ],
        )?;
        Ok(())
    }

    fn update_run(&self, run_id: &str, update: &RunUpdate) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT run_status FROM Runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        let current: RunStatus = current
            .ok_or_else(|| Error::NotFound(run_id.to_string()))?
            .parse()?;
        check_transition(run_id, current, update.status)?;

        tx.execute(
            "UPDATE Runs SET run_status = ?1, end_time = COALESCE(?2, end_time) WHERE run_id = ?3",
            params![update.status.as_str(), update.end_time.map(to_seconds), run_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn fetch_run(&self, run_id: &str) -> Result<Run> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT run_id, start_time, end_time, run_status, project FROM Runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let (run_id, start, end, status, project) =
            row.ok_or_else(|| Error::NotFound(run_id.to_string()))?;
        Ok(Run {
            run_id,
            start_time: from_seconds(start)?,
            end_time: end.map(from_seconds).transpose()?,
            status: status.parse()?,
            project,
        })
    }

    fn persist_run_config(&self, config: &RunConfiguration) -> Result<()> {
        let runtime_config = serde_json::to_string(&config.dbt_runtime_config)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO RunConfiguration (
                run_id, run_conf_version, project, server_url, cloud_provider,
                gcp_location, gcp_project, azure_location, azure_resource_group,
                schedule, schedule_name, requester, cron_schedule, dbt_runtime_config
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                config.run_id,
                config.run_conf_version,
                config.project,
                config.server_url,
                config.cloud_provider,
                config.gcp_location,
                config.gcp_project,
                config.azure_location,
                config.azure_resource_group,
                config.schedule,
                config.schedule_name,
                config.requester,
                config.cron_schedule,
                runtime_config,
            ],
        )?;
        Ok(())
    }

    fn fetch_run_config(&self, run_id: &str) -> Result<RunConfiguration> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT run_id, run_conf_version, project, server_url, cloud_provider,
                        gcp_location, gcp_project, azure_location, azure_resource_group,
                        schedule, schedule_name, requester, cron_schedule, dbt_runtime_config
                 FROM RunConfiguration WHERE run_id = ?1",
                params![run_id],
                |row| {
                    let config = RunConfiguration {
                        run_id: row.get(0)?,
                        run_conf_version: row.get(1)?,
                        project: row.get(2)?,
                        server_url: row.get(3)?,
                        cloud_provider: row.get(4)?,
                        gcp_location: row.get(5)?,
                        gcp_project: row.get(6)?,
                        azure_location: row.get(7)?,
                        azure_resource_group: row.get(8)?,
                        schedule: row.get(9)?,
                        schedule_name: row.get(10)?,
                        requester: row.get(11)?,
                        cron_schedule: row.get(12)?,
                        dbt_runtime_config: serde_json::Value::Null,
                    };
                    Ok((config, row.get::<_, String>(13)?))
                },
            )
            .optional()?;

        let (mut config, runtime_config) = row.ok_or_else(|| Error::NotFound(run_id.to_string()))?;
        config.dbt_runtime_config = serde_json::from_str(&runtime_config)?;
        Ok(config)
    }
}

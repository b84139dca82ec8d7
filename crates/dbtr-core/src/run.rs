//! Run rows and run configuration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Version written into every persisted run configuration.
pub const RUN_CONF_VERSION: i64 = 1;

/// Lifecycle status of a run.
///
/// ```text
/// initializing ──► running ──► success
///      │              ├──────► failed
///      │              └──────► server-error
///      ├─────────────────────► failed        (compile failure)
///      └─────────────────────► server-error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Initializing,
    Running,
    Success,
    Failed,
    ServerError,
}

impl RunStatus {
    /// Position in the lifecycle. Terminal states share the last rank.
    fn rank(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Running => 1,
            Self::Success | Self::Failed | Self::ServerError => 2,
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether a run in this status may move to `next`.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::ServerError => "server-error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            // Older rows were written with a space.
            "server-error" | "server error" => Ok(Self::ServerError),
            other => Err(Error::Storage(format!("unknown run status '{}'", other))),
        }
    }
}

/// One execution attempt of a transformation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub project: Option<String>,
}

impl Run {
    /// A freshly created run in `initializing`.
    pub fn initializing(run_id: impl Into<String>, project: Option<String>) -> Self {
        Self {
            run_id: run_id.into(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Initializing,
            project,
        }
    }
}

/// Fields changed by a run status update.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub end_time: Option<DateTime<Utc>>,
}

impl RunUpdate {
    /// Move to a non-terminal status.
    pub fn status(status: RunStatus) -> Self {
        Self {
            status,
            end_time: None,
        }
    }

    /// Move to a terminal status, stamping the end time.
    pub fn finished(status: RunStatus) -> Self {
        Self {
            status,
            end_time: Some(Utc::now()),
        }
    }
}

/// Configuration a run was submitted with. Written once, before execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub run_id: String,
    #[serde(default = "default_conf_version")]
    pub run_conf_version: i64,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub cloud_provider: Option<String>,
    #[serde(default)]
    pub gcp_location: Option<String>,
    #[serde(default)]
    pub gcp_project: Option<String>,
    #[serde(default)]
    pub azure_location: Option<String>,
    #[serde(default)]
    pub azure_resource_group: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub schedule_name: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    /// Engine parameters, opaque to the core.
    #[serde(default)]
    pub dbt_runtime_config: serde_json::Value,
}

fn default_conf_version() -> i64 {
    RUN_CONF_VERSION
}

impl RunConfiguration {
    /// Configuration for `run_id` with the given engine parameters and
    /// every descriptor unset.
    pub fn new(run_id: impl Into<String>, dbt_runtime_config: serde_json::Value) -> Self {
        Self {
            run_id: run_id.into(),
            run_conf_version: RUN_CONF_VERSION,
            dbt_runtime_config,
            ..Default::default()
        }
    }
}

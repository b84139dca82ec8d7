//! Boundary to the transformation engine.
//!
//! The engine is a black box with two calls: `parse` turns a project
//! directory into a compiled representation, `invoke` runs a command
//! against it. Both distinguish a *reported* failure (an expected outcome
//! recorded on the run) from an `Err` (something broke; the run ends in
//! `server-error`).

mod process;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use process::{CompiledManifest, DbtCommandRunner, render_args};

/// Engine parameters: a JSON object of named options.
pub type CommandParams = serde_json::Map<String, serde_json::Value>;

/// Result of a parse that did not raise.
#[derive(Debug)]
pub enum ParseOutcome<C> {
    /// The project compiled.
    Parsed(C),
    /// The engine reported that the project does not compile.
    Failed(String),
}

/// Result of an invocation that did not raise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeOutcome {
    pub success: bool,
    pub exception: Option<String>,
}

impl InvokeOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exception: None,
        }
    }

    pub fn failed(exception: impl Into<String>) -> Self {
        Self {
            success: false,
            exception: Some(exception.into()),
        }
    }
}

/// The compile/execute collaborator used by the run executor.
pub trait ProjectRunner: Send + Sync {
    /// Compiled project representation produced by [`parse`](Self::parse).
    type Compiled: Send;

    /// Build the compiled representation of the project at `project_dir`.
    fn parse(
        &self,
        project_dir: &Path,
        profiles_dir: &Path,
        params: &CommandParams,
    ) -> Result<ParseOutcome<Self::Compiled>>;

    /// Run `command` against a compiled project.
    fn invoke(
        &self,
        command: &[String],
        compiled: &Self::Compiled,
        params: &CommandParams,
    ) -> Result<InvokeOutcome>;
}

//! Core run execution pipeline for the dbtr remote executor.
//!
//! This crate provides:
//! - Run id generation (snowflake layout)
//! - Artifact ingestion (zip extraction + concurrent file placement)
//! - The execution lock serializing project builds
//! - Run and run-configuration persistence
//! - The run executor state machine

pub mod artifact;
pub mod engine;
pub mod error;
pub mod execute;
pub mod id;
pub mod lock;
pub mod paths;
pub mod run;
pub mod store;

pub use artifact::{
    PlacementErrorKind, PlacementFailure, PlacementOptions, PlacementReport, extract, place,
    unpack_and_persist,
};
pub use engine::{CommandParams, DbtCommandRunner, InvokeOutcome, ParseOutcome, ProjectRunner};
pub use error::{Error, Result};
pub use execute::{RunExecutor, RunFailure, RunOutcome, RunRequest, Submission};
pub use id::IdGenerator;
pub use lock::{ExecutionLock, LockToken};
pub use paths::WorkspaceDirs;
pub use run::{Run, RunConfiguration, RunStatus, RunUpdate};
pub use store::{MemoryRunStore, RunStore, SqliteRunStore};

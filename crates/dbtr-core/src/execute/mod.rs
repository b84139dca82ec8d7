//! Run execution.
//!
//! # Architecture
//!
//! ```text
//! Submission (bundle + RunConfiguration + command)
//!     │
//!     ├── artifact::unpack_and_persist ──► projects/<run_id>/
//!     ├── RunStore::persist_run_config
//!     │
//!     └── RunExecutor::execute
//!             │
//!             ├── RunGuard (row: initializing … terminal, server-error on drop)
//!             ├── prepare_params
//!             ├── ExecutionLock ─► ProjectRunner::parse (project_params) ─► release
//!             └── ProjectRunner::invoke (deps with project_params, then command)
//! ```
//!
//! # Module Structure
//!
//! - `executor` - RunExecutor and the run state machine
//! - `guard` - RunGuard owning a run row
//! - `params` - engine parameter preparation
//! - `submit` - bundle ingestion composed with execution

mod executor;
mod guard;
mod params;
mod submit;

pub use executor::{RunExecutor, RunFailure, RunOutcome, RunRequest};
pub use guard::RunGuard;
pub use params::{log_overlay, merged, parse_log_overlay, prepare_params, project_params};
pub use submit::Submission;

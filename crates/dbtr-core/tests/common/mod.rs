//! Shared fixtures for dbtr-core integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbtr_core::engine::{CommandParams, InvokeOutcome, ParseOutcome, ProjectRunner};
use dbtr_core::run::{Run, RunConfiguration, RunStatus, RunUpdate};
use dbtr_core::store::{MemoryRunStore, RunStore};
use dbtr_core::{Error, Result};

// =============================================================================
// Bundles
// =============================================================================

/// Build an in-memory zip archive from `(path, contents)` pairs.
pub fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        writer
            .write_all(contents.as_bytes())
            .expect("Failed to write zip entry");
    }
    writer.finish().expect("Failed to finish zip").into_inner()
}

/// Every file under `root`, relative and sorted, with `/` separators.
pub fn tree(root: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).expect("Failed to read dir") {
            let path = entry.expect("Failed to read entry").path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap();
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

// =============================================================================
// Recording store
// =============================================================================

/// Journal of store writes and engine calls, in order.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Status writes for `run_id`, in order.
    pub fn statuses(&self, run_id: &str) -> Vec<String> {
        let prefix = format!("{}:", run_id);
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

/// Memory store that journals every status written.
pub struct RecordingStore {
    inner: MemoryRunStore,
    journal: Journal,
}

impl RecordingStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: MemoryRunStore::new(),
            journal,
        }
    }
}

impl RunStore for RecordingStore {
    fn insert_run(&self, run: &Run) -> Result<()> {
        self.inner.insert_run(run)?;
        self.journal.push(format!("{}:{}", run.run_id, run.status));
        Ok(())
    }

    fn update_run(&self, run_id: &str, update: &RunUpdate) -> Result<()> {
        self.inner.update_run(run_id, update)?;
        self.journal.push(format!("{}:{}", run_id, update.status));
        Ok(())
    }

    fn fetch_run(&self, run_id: &str) -> Result<Run> {
        self.inner.fetch_run(run_id)
    }

    fn persist_run_config(&self, config: &RunConfiguration) -> Result<()> {
        self.inner.persist_run_config(config)
    }

    fn fetch_run_config(&self, run_id: &str) -> Result<RunConfiguration> {
        self.inner.fetch_run_config(run_id)
    }
}

/// Store whose updates to `running` always fail.
pub struct FlakyStore {
    pub inner: MemoryRunStore,
}

impl RunStore for FlakyStore {
    fn insert_run(&self, run: &Run) -> Result<()> {
        self.inner.insert_run(run)
    }

    fn update_run(&self, run_id: &str, update: &RunUpdate) -> Result<()> {
        if update.status == RunStatus::Running {
            return Err(Error::Storage("database is locked".to_string()));
        }
        self.inner.update_run(run_id, update)
    }

    fn fetch_run(&self, run_id: &str) -> Result<Run> {
        self.inner.fetch_run(run_id)
    }

    fn persist_run_config(&self, config: &RunConfiguration) -> Result<()> {
        self.inner.persist_run_config(config)
    }

    fn fetch_run_config(&self, run_id: &str) -> Result<RunConfiguration> {
        self.inner.fetch_run_config(run_id)
    }
}

// =============================================================================
// Scripted engine
// =============================================================================

/// What the scripted engine does on parse.
#[derive(Clone, Copy, Debug)]
pub enum ParseScript {
    Compile,
    ReportFailure,
    Raise,
    Panic,
}

/// What the scripted engine does on invoke.
#[derive(Clone, Copy, Debug)]
pub enum InvokeScript {
    Succeed,
    ReportFailure,
    Raise,
}

/// Compiled representation handed out by [`ScriptedRunner`].
#[derive(Debug)]
pub struct FakeManifest {
    pub project_dir: std::path::PathBuf,
}

/// Engine double with scripted outcomes that tracks concurrent builds.
pub struct ScriptedRunner {
    pub parse: ParseScript,
    pub invoke: InvokeScript,
    pub build_time: Duration,
    pub journal: Journal,
    pub active_builds: AtomicUsize,
    pub max_active_builds: AtomicUsize,
    pub invoked: Mutex<Vec<(Vec<String>, CommandParams)>>,
    pub parsed_params: Mutex<Vec<CommandParams>>,
}

impl ScriptedRunner {
    pub fn new(parse: ParseScript, invoke: InvokeScript, journal: Journal) -> Self {
        Self {
            parse,
            invoke,
            build_time: Duration::ZERO,
            journal,
            active_builds: AtomicUsize::new(0),
            max_active_builds: AtomicUsize::new(0),
            invoked: Mutex::new(Vec::new()),
            parsed_params: Mutex::new(Vec::new()),
        }
    }

    pub fn with_build_time(mut self, build_time: Duration) -> Self {
        self.build_time = build_time;
        self
    }
}

impl ProjectRunner for ScriptedRunner {
    type Compiled = FakeManifest;

    fn parse(
        &self,
        project_dir: &Path,
        _profiles_dir: &Path,
        params: &CommandParams,
    ) -> Result<ParseOutcome<FakeManifest>> {
        let now = self.active_builds.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_builds.fetch_max(now, Ordering::SeqCst);
        self.journal.push("parse");
        self.parsed_params.lock().unwrap().push(params.clone());
        std::thread::sleep(self.build_time);
        self.active_builds.fetch_sub(1, Ordering::SeqCst);

        match self.parse {
            ParseScript::Compile => Ok(ParseOutcome::Parsed(FakeManifest {
                project_dir: project_dir.to_path_buf(),
            })),
            ParseScript::ReportFailure => {
                Ok(ParseOutcome::Failed("Compilation Error in model a".to_string()))
            }
            ParseScript::Raise => Err(Error::Engine("parser crashed".to_string())),
            ParseScript::Panic => panic!("parser panicked mid-build"),
        }
    }

    fn invoke(
        &self,
        command: &[String],
        _compiled: &FakeManifest,
        params: &CommandParams,
    ) -> Result<InvokeOutcome> {
        self.journal.push(format!("invoke {}", command.join(" ")));
        self.invoked
            .lock()
            .unwrap()
            .push((command.to_vec(), params.clone()));

        match self.invoke {
            InvokeScript::Succeed => Ok(InvokeOutcome::succeeded()),
            InvokeScript::ReportFailure => Ok(InvokeOutcome::failed("Database Error in model b")),
            InvokeScript::Raise => Err(Error::Engine("adapter connection reset".to_string())),
        }
    }
}

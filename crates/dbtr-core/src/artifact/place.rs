//! Concurrent file placement.
//!
//! Files are handed to a Rayon pool sized to `max_workers`. Each transfer
//! reports a tagged result over a channel; the caller gathers them until
//! every file has reported or the deadline elapses, then decides whether to
//! raise.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Instant;

use crate::error::{Error, Result};

use super::{PlacementFailure, PlacementOptions, PlacementReport};

/// Per-file outcome sent back by a worker: (enumeration index, result).
type TransferResult = (usize, std::result::Result<(), PlacementFailure>);

/// Transfers still running when the deadline elapsed.
pub(crate) struct Outstanding {
    rx: Receiver<TransferResult>,
    remaining: usize,
}

impl Outstanding {
    /// Block until every outstanding transfer has reported.
    ///
    /// Returns the late failures.
    pub(crate) fn wait(self) -> Vec<PlacementFailure> {
        let failures: Vec<PlacementFailure> = self
            .rx
            .iter()
            .filter_map(|(_, result)| result.err())
            .collect();
        for failure in &failures {
            tracing::warn!("Late placement failure: {}", failure);
        }
        failures
    }

    /// Wait on a background thread, then drop `keep_alive`.
    pub(crate) fn finish_in_background<T: Send + 'static>(self, keep_alive: T) {
        let remaining = self.remaining;
        let spawned = std::thread::Builder::new()
            .name("dbtr-place-drain".to_string())
            .spawn(move || {
                let failures = self.wait();
                tracing::debug!(
                    "{} late transfers finished ({} failed)",
                    remaining,
                    failures.len()
                );
                drop(keep_alive);
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to wait for {} late transfers: {}", remaining, e);
        }
    }
}

/// Place every file under `source` at the mirrored path under `destination`.
///
/// See [`PlacementOptions`] for copy/move, concurrency, deadline and
/// fail-fast behavior. Transfers that miss the deadline keep running in the
/// background and are listed in [`PlacementReport::pending`].
///
/// # Errors
/// - [`Error::Io`] if `source` cannot be enumerated or the pool cannot start.
/// - [`Error::Placement`] with the first failure in enumeration order when
///   `fail_fast` is set.
pub fn place(source: &Path, destination: &Path, options: &PlacementOptions) -> Result<PlacementReport> {
    let (report, _outstanding) = dispatch(source, destination, options)?;
    check(report, options)
}

/// Raise the first failure under `fail_fast`, otherwise hand back the report.
pub(crate) fn check(report: PlacementReport, options: &PlacementOptions) -> Result<PlacementReport> {
    if options.fail_fast {
        if let Some(first) = report.failures.first() {
            return Err(Error::Placement(first.clone()));
        }
    } else if !report.failures.is_empty() {
        tracing::warn!("{} files could not be placed", report.failures.len());
    }
    Ok(report)
}

/// Run every transfer and gather results until done or the deadline.
///
/// Returns the report and, if the deadline elapsed, the handle on the
/// transfers still running.
pub(crate) fn dispatch(
    source: &Path,
    destination: &Path,
    options: &PlacementOptions,
) -> Result<(PlacementReport, Option<Outstanding>)> {
    let files = list_files(source)?;
    let total = files.len();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.max_workers.clamp(1, total.max(1)))
        .thread_name(|i| format!("dbtr-place-{}", i))
        .build()
        .map_err(|e| Error::Io(io::Error::other(e.to_string())))?;

    let started = Instant::now();
    let (tx, rx) = mpsc::channel::<TransferResult>();

    for (index, relative) in files.iter().enumerate() {
        let tx = tx.clone();
        let from = source.join(relative);
        let to = destination.join(relative);
        let relative = relative.clone();
        let move_semantics = options.move_semantics;
        pool.spawn(move || {
            let result = transfer(&from, &to, move_semantics).map_err(|e| PlacementFailure {
                path: relative,
                kind: e.kind().into(),
                message: e.to_string(),
            });
            // Nobody listens once the outstanding handle is dropped.
            let _ = tx.send((index, result));
        });
    }
    drop(tx);
    // Dropping the pool lets already spawned transfers run to completion.
    drop(pool);

    let mut results: Vec<Option<std::result::Result<(), PlacementFailure>>> = vec![None; total];
    let mut received = 0;
    while received < total {
        let next = match options.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_sub(started.elapsed());
                match rx.recv_timeout(remaining) {
                    Ok(next) => next,
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::warn!(
                            "Placement deadline of {:?} elapsed with {} of {} files outstanding",
                            deadline,
                            total - received,
                            total
                        );
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(next) => next,
                Err(_) => break,
            },
        };
        let (index, result) = next;
        results[index] = Some(result);
        received += 1;
    }

    let mut report = PlacementReport {
        destination: destination.to_path_buf(),
        ..Default::default()
    };
    for (relative, result) in files.into_iter().zip(results) {
        match result {
            Some(Ok(())) => report.placed.push(relative),
            Some(Err(failure)) => report.failures.push(failure),
            None => report.pending.push(relative),
        }
    }

    tracing::debug!(
        "Placed {}/{} files into {} in {:?}",
        report.placed.len(),
        total,
        destination.display(),
        started.elapsed()
    );

    let outstanding = (!report.pending.is_empty()).then(|| Outstanding {
        rx,
        remaining: report.pending.len(),
    });
    Ok((report, outstanding))
}

/// Copy or move one file, creating parent directories on demand.
fn transfer(from: &Path, to: &Path, move_semantics: bool) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if !move_semantics {
        fs::copy(from, to)?;
        return Ok(());
    }
    if fs::rename(from, to).is_err() {
        // Rename fails across filesystems; fall back to copy + delete.
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

/// Every file under `root`, relative to `root`, in a stable order.
fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(&dir).map_err(|e| Error::io_at(&dir, e))? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                dirs.push(path);
            } else if file_type.is_file() {
                if let Ok(relative) = path.strip_prefix(root) {
                    files.push(relative.to_path_buf());
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

//! Execution lock guarding the project build step.
//!
//! Parsing a project writes shared engine state, so only one run may build
//! its compiled representation at a time. The lock is an explicit handle:
//! every [`ExecutionLock::new`] is independent, and clones share one lock.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

struct Shared {
    resource: String,
    held: Mutex<bool>,
    released: Condvar,
}

/// Mutual exclusion over a named shared resource (e.g. `"compiler"`).
#[derive(Clone)]
pub struct ExecutionLock {
    shared: Arc<Shared>,
}

fn lock_error<T>(resource: &str, e: PoisonError<T>) -> Error {
    Error::LockAcquisition {
        resource: resource.to_string(),
        message: format!("lock state poisoned (thread panicked): {}", e),
    }
}

impl ExecutionLock {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                resource: resource.into(),
                held: Mutex::new(false),
                released: Condvar::new(),
            }),
        }
    }

    /// Name of the guarded resource.
    pub fn resource(&self) -> &str {
        &self.shared.resource
    }

    fn state(&self) -> Result<MutexGuard<'_, bool>> {
        self.shared
            .held
            .lock()
            .map_err(|e| lock_error(&self.shared.resource, e))
    }

    /// Block until the lock is free, then take it.
    pub fn acquire(&self) -> Result<LockToken> {
        let mut held = self.state()?;
        while *held {
            held = self
                .shared
                .released
                .wait(held)
                .map_err(|e| lock_error(&self.shared.resource, e))?;
        }
        *held = true;
        tracing::debug!("Acquired execution lock '{}'", self.shared.resource);
        Ok(LockToken {
            shared: Some(self.shared.clone()),
        })
    }

    /// Take the lock if it is free.
    pub fn try_acquire(&self) -> Result<Option<LockToken>> {
        let mut held = self.state()?;
        if *held {
            return Ok(None);
        }
        *held = true;
        Ok(Some(LockToken {
            shared: Some(self.shared.clone()),
        }))
    }

    /// Whether some token currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state().map(|held| *held).unwrap_or(true)
    }
}

/// Proof of holding an [`ExecutionLock`].
///
/// Released by [`LockToken::release`] or on drop, whichever happens first.
/// Later releases are no-ops.
#[must_use = "the lock is released as soon as the token is dropped"]
pub struct LockToken {
    shared: Option<Arc<Shared>>,
}

impl LockToken {
    /// Release the lock. Safe to call more than once.
    pub fn release(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        // Release must happen even if another holder panicked.
        let mut held = shared.held.lock().unwrap_or_else(|e| e.into_inner());
        *held = false;
        drop(held);
        shared.released.notify_one();
        tracing::debug!("Released execution lock '{}'", shared.resource);
    }

    /// Whether this token still holds the lock.
    pub fn is_held(&self) -> bool {
        self.shared.is_some()
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.release();
    }
}

//! Named, re-entrant, cross-process locks keyed by configuration file path.
//!
//! Each configuration file `dir/<name>.yml` is guarded by `dir/.<name>.lock`.
//! The in-process half tracks the owning thread and a re-entry depth so the
//! same thread can take the lock again while it already holds it. The
//! cross-process half is an `fs2` exclusive advisory lock taken when the
//! depth goes from zero to one and released when it returns to zero.

use crate::error::{ConfigError, Result};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::debug;

/// Path of the lock file guarding `config_file`.
pub fn lock_path_for(config_file: &Path) -> PathBuf {
    let stem = config_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = config_file.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{stem}.lock"))
}

#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
    file: Option<File>,
}

/// One named lock. Shared by every document that resolves to the same path.
pub struct NamedLock {
    lock_file: PathBuf,
    state: Mutex<LockState>,
    released: Condvar,
}

impl NamedLock {
    fn new(lock_file: PathBuf) -> Self {
        Self {
            lock_file,
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
        }
    }

    /// Path of the backing lock file.
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Block until this thread holds the lock.
    pub fn acquire(self: &Arc<Self>) -> Result<LockGuard> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.owner.is_some_and(|owner| owner != me) {
            self.released.wait(&mut state);
        }

        if state.owner == Some(me) {
            state.depth += 1;
            return Ok(LockGuard {
                lock: Arc::clone(self),
            });
        }

        state.file = self.lock_across_processes()?;
        state.owner = Some(me);
        state.depth = 1;
        Ok(LockGuard {
            lock: Arc::clone(self),
        })
    }

    /// Current re-entry depth (0 when free).
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    fn lock_across_processes(&self) -> Result<Option<File>> {
        let file = match OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)
        {
            Ok(file) => file,
            Err(e) => {
                // Read-only directories still get in-process exclusion.
                debug!(
                    path = %self.lock_file.display(),
                    "Lock file unavailable, using in-process lock only: {}",
                    e
                );
                return Ok(None);
            }
        };
        file.lock_exclusive().map_err(|source| ConfigError::Lock {
            path: self.lock_file.clone(),
            source,
        })?;
        Ok(Some(file))
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return;
        }
        if let Some(file) = state.file.take()
            && let Err(e) = FileExt::unlock(&file)
        {
            debug!(path = %self.lock_file.display(), "Failed to unlock: {}", e);
        }
        state.owner = None;
        drop(state);
        self.released.notify_one();
    }
}

/// Held lock. Released on drop.
pub struct LockGuard {
    lock: Arc<NamedLock>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Process-wide table of named locks, one per configuration file path.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<PathBuf, Arc<NamedLock>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `config_file`, created on first use.
    pub fn lock_for(&self, config_file: &Path) -> Arc<NamedLock> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(config_file.to_path_buf())
                .or_insert_with(|| Arc::new(NamedLock::new(lock_path_for(config_file)))),
        )
    }

    /// Acquire the lock guarding `config_file`.
    pub fn acquire(&self, config_file: &Path) -> Result<LockGuard> {
        self.lock_for(config_file).acquire()
    }
}

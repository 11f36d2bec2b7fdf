use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::utils::multierr::MultiError;

type CleanupAction = Box<dyn FnOnce() -> io::Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CleanupId(u64);

/// Cleanup actions owned by one download.
///
/// Every action runs at most once: either explicitly through [`CleanupScope::run`]
/// when its owner is done, or through [`CleanupScope::run_all`] when the process is
/// told to stop. The terminator only ever holds a `Weak` to the scope.
pub struct CleanupScope {
    next_id: AtomicU64,
    actions: Mutex<BTreeMap<CleanupId, (String, CleanupAction)>>,
}

impl CleanupScope {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            actions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register<F>(&self, label: impl Into<String>, action: F) -> CleanupId
    where
        F: FnOnce() -> io::Result<()> + Send + 'static,
    {
        let id = CleanupId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let label = label.into();
        debug!(?id, %label, "registered cleanup");
        self.lock().insert(id, (label, Box::new(action)));
        id
    }

    /// Runs a single action. Running an id twice is a no-op.
    pub fn run(&self, id: CleanupId) -> io::Result<()> {
        let entry = self.lock().remove(&id);
        match entry {
            Some((label, action)) => {
                debug!(?id, %label, "running cleanup");
                action()
            }
            None => Ok(()),
        }
    }

    /// Forgets an action without running it, once its owner no longer needs it.
    pub fn dismiss(&self, id: CleanupId) -> bool {
        let dismissed = self.lock().remove(&id);
        if let Some((label, _)) = &dismissed {
            debug!(?id, %label, "dismissed cleanup");
        }
        dismissed.is_some()
    }

    /// Runs every pending action, newest first, and reports all failures together.
    pub fn run_all(&self) -> Result<(), MultiError<io::Error>> {
        let pending = std::mem::take(&mut *self.lock());
        let mut errs = MultiError::new();
        for (id, (label, action)) in pending.into_iter().rev() {
            debug!(?id, %label, "running cleanup");
            if let Err(err) = action() {
                errs.push(err);
            }
        }
        errs.into_result()
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<CleanupId, (String, CleanupAction)>> {
        // Actions run outside the lock, so a poisoned map is still consistent.
        self.actions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CleanupScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CleanupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupScope")
            .field("pending", &self.pending())
            .finish()
    }
}

/// An action removing `path` recursively; a missing directory counts as removed.
pub fn remove_dir(path: PathBuf) -> impl FnOnce() -> io::Result<()> + Send + 'static {
    move || match std::fs::remove_dir_all(&path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// An action removing a single file; a missing file counts as removed.
pub fn remove_file(path: PathBuf) -> impl FnOnce() -> io::Result<()> + Send + 'static {
    move || match std::fs::remove_file(&path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

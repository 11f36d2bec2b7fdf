use std::io;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::error::{DownloadError, Result};
use crate::utils::cleanup::{CleanupId, CleanupScope, remove_dir};

/// The per-download temporary directory holding chunk artifacts.
///
/// Its removal is registered in the download's [`CleanupScope`], so it happens
/// exactly once whether the download finishes, fails, or the process is
/// interrupted.
pub struct ScratchDir {
    dir: TempDir,
    scope: Arc<CleanupScope>,
    id: CleanupId,
}

impl ScratchDir {
    pub fn create(scope: &Arc<CleanupScope>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("pdl-")
            .tempdir()
            .map_err(|err| DownloadError::io(std::env::temp_dir(), err))?;
        let id = scope.register(
            format!("remove {}", dir.path().display()),
            remove_dir(dir.path().to_path_buf()),
        );
        Ok(Self {
            dir,
            scope: Arc::clone(scope),
            id,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn close(self) -> io::Result<()> {
        self.scope.run(self.id)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = self.scope.run(self.id);
    }
}

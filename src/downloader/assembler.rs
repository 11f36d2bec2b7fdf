use std::io;
use std::path::Path;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::downloader::fetcher::ChunkArtifact;
use crate::error::{DownloadError, Result};
use crate::utils::cleanup::{CleanupScope, remove_file};

/// Fails with [`DownloadError::DestinationExists`] if anything is at `destination`.
pub async fn ensure_absent(destination: &Path) -> Result<()> {
    match fs::symlink_metadata(destination).await {
        Ok(_) => Err(DownloadError::DestinationExists(destination.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(DownloadError::io(destination, err)),
    }
}

/// Concatenates `artifacts` in index order into a newly created `destination`.
///
/// Exactly `expected` artifacts, indexed `0..expected`, must be present. The
/// destination is created exclusively and its removal stays registered in `scope`
/// until the copy succeeds, so a forced exit mid-copy still cleans it up. If copying
/// fails or `token` is cancelled, the partial destination is removed. Returns the
/// bytes written.
pub async fn assemble(
    mut artifacts: Vec<ChunkArtifact>,
    expected: usize,
    destination: &Path,
    scope: &CleanupScope,
    token: &CancellationToken,
) -> Result<u64> {
    artifacts.sort_by_key(|artifact| artifact.index);
    for index in 0..expected {
        match artifacts.get(index) {
            Some(artifact) if artifact.index == index => {}
            _ => return Err(DownloadError::MissingChunk(index)),
        }
    }
    if let Some(extra) = artifacts.get(expected) {
        return Err(DownloadError::UnexpectedChunk(extra.index));
    }

    let dst = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await
        .map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => {
                DownloadError::DestinationExists(destination.to_path_buf())
            }
            _ => DownloadError::io(destination, err),
        })?;
    let partial = scope.register(
        format!("remove partial {}", destination.display()),
        remove_file(destination.to_path_buf()),
    );

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(DownloadError::Cancelled),
        result = concat(dst, &artifacts, destination) => result,
    };

    match result {
        Ok(_) => {
            scope.dismiss(partial);
        }
        Err(_) => {
            if let Err(err) = scope.run(partial) {
                warn!(path = %destination.display(), error = %err, "failed to remove partial destination");
            }
        }
    }

    result
}

async fn concat(mut dst: File, artifacts: &[ChunkArtifact], destination: &Path) -> Result<u64> {
    let mut written = 0;
    for artifact in artifacts {
        let mut src = File::open(artifact.path())
            .await
            .map_err(|err| DownloadError::io(artifact.path(), err))?;
        let copied = tokio::io::copy(&mut src, &mut dst)
            .await
            .map_err(|err| DownloadError::io(destination, err))?;
        debug!(index = artifact.index, bytes = copied, "appended chunk");
        written += copied;
    }

    dst.flush()
        .await
        .map_err(|err| DownloadError::io(destination, err))?;
    dst.sync_all()
        .await
        .map_err(|err| DownloadError::io(destination, err))?;

    Ok(written)
}

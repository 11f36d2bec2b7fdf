use std::path::Path;

use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode, Url};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::downloader::planer::RangeSpec;
use crate::error::{DownloadError, Result, Stage};

/// A downloaded range persisted in the scratch directory.
///
/// The file is deleted when the artifact is dropped, so an artifact that never
/// reaches the assembler cannot outlive the download.
#[derive(Debug)]
pub struct ChunkArtifact {
    pub index: usize,
    path: TempPath,
}

impl ChunkArtifact {
    pub(crate) fn new(index: usize, path: TempPath) -> Self {
        Self { index, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Downloads one range into a new file under `dir`.
///
/// Only `206 Partial Content` is accepted. Cancellation of `token` drops the
/// transfer and reports [`DownloadError::Cancelled`].
pub async fn fetch_range(
    client: &Client,
    url: &Url,
    range: RangeSpec,
    dir: &Path,
    token: &CancellationToken,
) -> Result<ChunkArtifact> {
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(index = range.index, "range cancelled");
            Err(DownloadError::Cancelled)
        }
        result = transfer(client, url, range, dir) => result,
    }
}

async fn transfer(client: &Client, url: &Url, range: RangeSpec, dir: &Path) -> Result<ChunkArtifact> {
    let stage = Stage::Range(range.index);
    let header = range.header_value();
    debug!(index = range.index, range = %header, "start GET request");

    let response = client
        .get(url.clone())
        .header(RANGE, &header)
        .send()
        .await
        .map_err(DownloadError::transport(stage))?;

    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::UnexpectedStatus { stage, status });
    }

    let prefix = format!("{:05}-", range.index);
    let (file, path) = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|err| DownloadError::io(dir, err))?
        .into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(DownloadError::transport(stage))?;
        written += chunk.len() as u64;
        // Stop before an oversized body reaches the disk.
        if written > range.len() {
            return Err(DownloadError::LengthMismatch {
                index: range.index,
                expected: range.len(),
                actual: written,
            });
        }
        file.write_all(&chunk)
            .await
            .map_err(|err| DownloadError::io(&*path, err))?;
    }
    file.flush()
        .await
        .map_err(|err| DownloadError::io(&*path, err))?;

    if written != range.len() {
        return Err(DownloadError::LengthMismatch {
            index: range.index,
            expected: range.len(),
            actual: written,
        });
    }

    debug!(index = range.index, bytes = written, path = %path.display(), "range downloaded");

    Ok(ChunkArtifact::new(range.index, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Faults;
    use crate::testing::{client, serve_bytes, start_mock_server};
    use axum::Router;
    use axum::body::{Body, Bytes};
    use axum::http::{HeaderMap, StatusCode as HttpStatus, header};
    use axum::routing::get;
    use std::time::Duration;

    const CONTENTS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    fn range(index: usize, first_byte: u64, last_byte: u64) -> RangeSpec {
        RangeSpec {
            index,
            first_byte,
            last_byte,
        }
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_fetch_range_persists_body() {
        let served = serve_bytes("file.bin", CONTENTS, Faults::default()).await;
        let url = served.url.clone();
        let dir = tempfile::tempdir().unwrap();

        let artifact = fetch_range(&client(), &url, range(1, 10, 15), dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.index, 1);
        assert!(artifact.path().starts_with(dir.path()));
        assert_eq!(std::fs::read(artifact.path()).unwrap(), b"abcdef");

        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_full_response_is_rejected() {
        let app = Router::new().route("/file.bin", get(|| async { Bytes::from_static(CONTENTS) }));
        let url = start_mock_server(app).await.join("file.bin").unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = fetch_range(&client(), &url, range(0, 0, 3), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DownloadError::UnexpectedStatus { stage: Stage::Range(0), status } if status == StatusCode::OK
        ));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_short_body_is_length_mismatch() {
        let app = Router::new().route(
            "/file.bin",
            get(|| async { (HttpStatus::PARTIAL_CONTENT, Bytes::from_static(b"ab")) }),
        );
        let url = start_mock_server(app).await.join("file.bin").unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = fetch_range(&client(), &url, range(3, 0, 9), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DownloadError::LengthMismatch {
                index: 3,
                expected: 10,
                actual: 2
            }
        ));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_endless_body_stops_at_range_length() {
        let app = Router::new().route(
            "/file.bin",
            get(|| async {
                let chunks = futures::stream::repeat_with(|| {
                    Ok::<_, std::io::Error>(Bytes::from_static(&[b'z'; 1024]))
                });
                (HttpStatus::PARTIAL_CONTENT, Body::from_stream(chunks))
            }),
        );
        let url = start_mock_server(app).await.join("file.bin").unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            fetch_range(&client(), &url, range(0, 0, 9), dir.path(), &CancellationToken::new()),
        )
        .await
        .expect("an oversized body should be rejected while streaming")
        .unwrap_err();

        match err {
            DownloadError::LengthMismatch {
                index: 0,
                expected: 10,
                actual,
            } => assert!(actual > 10),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_transfer() {
        let app = Router::new().route(
            "/file.bin",
            get(|headers: HeaderMap| async move {
                assert!(headers.contains_key(header::RANGE));
                tokio::time::sleep(Duration::from_secs(30)).await;
                (HttpStatus::PARTIAL_CONTENT, Bytes::from_static(b"x"))
            }),
        );
        let url = start_mock_server(app).await.join("file.bin").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            })
        };

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            fetch_range(&client(), &url, range(0, 0, 0), dir.path(), &token),
        )
        .await
        .expect("fetch should stop once cancelled")
        .unwrap_err();

        canceller.await.unwrap();
        assert!(matches!(err, DownloadError::Cancelled));
        assert_eq!(entries(dir.path()), 0);
    }
}

use std::collections::BTreeMap;
use std::path::Path;

use reqwest::{Client, Url};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::downloader::fetcher::{ChunkArtifact, fetch_range};
use crate::downloader::planer::RangeSpec;
use crate::error::{DownloadError, Result};

/// Fetches every range concurrently, one task per range.
///
/// The first failure cancels `token` and every remaining task is drained before
/// the error is returned. On success the artifacts come back in index order.
pub async fn fetch_all(
    client: &Client,
    url: &Url,
    ranges: &[RangeSpec],
    dir: &Path,
    token: &CancellationToken,
) -> Result<Vec<ChunkArtifact>> {
    let mut tasks = JoinSet::new();
    for range in ranges.iter().copied() {
        let client = client.clone();
        let url = url.clone();
        let dir = dir.to_path_buf();
        let token = token.clone();
        tasks.spawn(async move { fetch_range(&client, &url, range, &dir, &token).await });
    }

    let mut artifacts = BTreeMap::new();
    let mut first_err: Option<DownloadError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(DownloadError::from).and_then(|fetched| fetched) {
            Ok(artifact) => {
                debug!(index = artifact.index, remaining = tasks.len(), "range done");
                artifacts.insert(artifact.index, artifact);
            }
            Err(err) if first_err.is_none() => {
                if !err.is_cancellation() {
                    warn!(error = %err, "range failed, cancelling the others");
                }
                token.cancel();
                first_err = Some(err);
            }
            Err(err) => debug!(error = %err, "range stopped after earlier failure"),
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    Ok(artifacts.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::planer::plan;
    use crate::server::Faults;
    use crate::testing::{client, serve_bytes, start_mock_server};
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CONTENTS: &[u8] = b"the quick brown fox jumps over the lazy dog";

    fn first_byte(headers: &HeaderMap) -> u64 {
        let value = headers.get(header::RANGE).unwrap().to_str().unwrap();
        let span = value.strip_prefix("bytes=").unwrap();
        span.split('-').next().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_fetch_all_in_index_order() {
        let served = serve_bytes("file.bin", CONTENTS, Faults::default()).await;
        let url = served.url.clone();
        let dir = tempfile::tempdir().unwrap();
        let ranges = plan(CONTENTS.len() as u64, 4);

        let artifacts = fetch_all(&client(), &url, &ranges, dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 4);
        let mut joined = Vec::new();
        for (i, artifact) in artifacts.iter().enumerate() {
            assert_eq!(artifact.index, i);
            joined.extend(std::fs::read(artifact.path()).unwrap());
        }
        assert_eq!(joined, CONTENTS);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_siblings() {
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);
        let app = Router::new().route(
            "/file.bin",
            get(move |headers: HeaderMap| {
                let counter = Arc::clone(&counter);
                async move {
                    if first_byte(&headers) == 10 {
                        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                    }
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Response::new(axum::body::Body::empty())
                }
            }),
        );
        let url = start_mock_server(app).await.join("file.bin").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let ranges = plan(40, 4);

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            fetch_all(&client(), &url, &ranges, dir.path(), &token),
        )
        .await
        .expect("siblings should be cancelled")
        .unwrap_err();

        assert!(matches!(
            err,
            DownloadError::UnexpectedStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert!(token.is_cancelled());
        assert_eq!(served.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_successful_artifacts_dropped_on_failure() {
        let app = Router::new().route(
            "/file.bin",
            get(|headers: HeaderMap| async move {
                let first = first_byte(&headers);
                if first == 0 {
                    // Let the other ranges land on disk first.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    return StatusCode::BAD_REQUEST.into_response();
                }
                (StatusCode::PARTIAL_CONTENT, vec![b'x'; 10]).into_response()
            }),
        );
        let url = start_mock_server(app).await.join("file.bin").unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = fetch_all(&client(), &url, &plan(40, 4), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::UnexpectedStatus { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_external_cancel_drains_all() {
        let app = Router::new().route(
            "/file.bin",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StatusCode::PARTIAL_CONTENT
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
            fetch_all(&client(), &url, &plan(100, 8), dir.path(), &token),
        )
        .await
        .unwrap()
        .unwrap_err();

        canceller.await.unwrap();
        assert!(matches!(err, DownloadError::Cancelled));
    }
}

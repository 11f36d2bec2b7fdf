use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap};
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AcceptRanges, DownloadError, Result, Stage};

/// What the HEAD response told us about the resource.
///
/// Only produced for resources that advertise `Accept-Ranges: bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentInfo {
    pub total_length: u64,
}

/// Issues a HEAD request and validates that the resource can be split.
pub async fn probe(client: &Client, url: &Url, token: &CancellationToken) -> Result<ContentInfo> {
    info!(%url, "start HEAD request to get Content-Length");

    let response = tokio::select! {
        _ = token.cancelled() => return Err(DownloadError::Cancelled),
        response = client.head(url.clone()).send() => {
            response.map_err(DownloadError::transport(Stage::Probe))?
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::UnexpectedStatus {
            stage: Stage::Probe,
            status,
        });
    }

    content_info(response.headers())
}

fn content_info(headers: &HeaderMap) -> Result<ContentInfo> {
    validate_accept_ranges(headers)?;

    // Read the header directly: a HEAD response has no body, so the body size hint is 0.
    let total_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0);

    debug!(total_length, "got Content-Length");

    if total_length < 1 {
        return Err(DownloadError::NoContent);
    }

    Ok(ContentInfo { total_length })
}

fn validate_accept_ranges(headers: &HeaderMap) -> Result<()> {
    let value = match headers.get(ACCEPT_RANGES) {
        Some(value) => value,
        None => return Err(DownloadError::RangesUnsupported(AcceptRanges::Missing)),
    };

    debug!(accept_ranges = ?value, "got Accept-Ranges");

    if value.as_bytes() != b"bytes" {
        let unit = String::from_utf8_lossy(value.as_bytes()).into_owned();
        return Err(DownloadError::RangesUnsupported(AcceptRanges::Unit(unit)));
    }

    Ok(())
}

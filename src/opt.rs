use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::downloader::DownloadOptions;
use crate::error::{DownloadError, Result};

const DEFAULT_FILENAME: &str = "index.html";

impl DownloadOptions {
    /// Validates raw command-line values.
    ///
    /// Without `output`, the file is named after the URL's last path segment.
    /// A zero `timeout` disables the deadline.
    pub fn resolve(
        url: &str,
        parallelism: usize,
        output: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let url = parse_url(url)?;
        let output = output.unwrap_or_else(|| PathBuf::from(default_filename(&url)));
        let timeout = if timeout.is_zero() { None } else { Some(timeout) };

        Ok(DownloadOptions {
            url,
            parallelism,
            output,
            timeout,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    let invalid = |reason: String| DownloadError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(invalid(format!("unsupported scheme {:?}", scheme))),
    }
}

fn default_filename(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_FILENAME)
        .to_string()
}

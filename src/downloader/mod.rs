pub mod assembler;
pub mod executor;
pub mod fetcher;
pub mod planer;
pub mod prober;
mod scratch;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Client, Url};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{DownloadError, Result};
use crate::utils::cleanup::CleanupScope;
use scratch::ScratchDir;

/// Everything one download attempt needs, already validated.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub url: Url,
    pub parallelism: usize,
    pub output: PathBuf,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub path: PathBuf,
    pub bytes: u64,
    pub ranges: usize,
}

pub struct Downloader {
    client: Client,
    scope: Arc<CleanupScope>,
}

impl Downloader {
    pub fn new(client: Client, scope: Arc<CleanupScope>) -> Self {
        Self { client, scope }
    }

    /// Runs one download end to end.
    ///
    /// `cancel` is the caller's token (e.g. the interrupt listener). The download
    /// works on a child of it so a failing range never cancels the caller, and the
    /// timeout is just one more way that child gets cancelled.
    pub async fn download(
        &self,
        options: &DownloadOptions,
        cancel: &CancellationToken,
    ) -> Result<Downloaded> {
        let token = cancel.child_token();
        let deadline = options.timeout.map(|timeout| Deadline::arm(&token, timeout));

        let result = self.run(options, &token).await;

        let timed_out = deadline.map(Deadline::disarm).unwrap_or(false);
        match (result, options.timeout) {
            (Err(err), Some(timeout)) if err.is_cancellation() && timed_out => {
                Err(DownloadError::TimedOut(timeout))
            }
            (result, _) => result,
        }
    }

    async fn run(&self, options: &DownloadOptions, token: &CancellationToken) -> Result<Downloaded> {
        assembler::ensure_absent(&options.output).await?;

        info!(state = "probing", url = %options.url);
        let content = prober::probe(&self.client, &options.url, token).await?;

        let ranges = planer::plan(content.total_length, options.parallelism);
        info!(
            state = "partitioning",
            total_length = content.total_length,
            ranges = ranges.len()
        );

        let scratch = ScratchDir::create(&self.scope)?;
        info!(state = "fetching", dir = %scratch.path().display());

        let result = async {
            let artifacts =
                executor::fetch_all(&self.client, &options.url, &ranges, scratch.path(), token)
                    .await?;
            info!(state = "assembling", output = %options.output.display());
            assembler::assemble(artifacts, ranges.len(), &options.output, &self.scope, token)
                .await
        }
        .await;

        let dir = scratch.path().to_path_buf();
        if let Err(err) = scratch.close() {
            warn!(dir = %dir.display(), error = %err, "failed to remove scratch directory");
        }

        let bytes = result?;
        info!(state = "completed", output = %options.output.display(), bytes);

        Ok(Downloaded {
            path: options.output.clone(),
            bytes,
            ranges: ranges.len(),
        })
    }
}

/// Cancels a token once `timeout` elapses, remembering that it did.
struct Deadline {
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Deadline {
    fn arm(token: &CancellationToken, timeout: Duration) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn({
            let token = token.clone();
            let fired = Arc::clone(&fired);
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        fired.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            }
        });
        Self { fired, handle }
    }

    fn disarm(self) -> bool {
        self.handle.abort();
        self.fired.load(Ordering::SeqCst)
    }
}

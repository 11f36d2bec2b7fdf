//! Ctrl+C / SIGTERM handling.
//!
//! The first signal cancels the shared token so the running download drains its
//! tasks and cleans up on its own. A second signal runs every registered cleanup
//! and exits immediately.

use std::io;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::utils::cleanup::CleanupScope;

/// Exit status used when the user forces termination.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Starts listening for termination signals. Abort the handle once the download ends.
pub fn listen(token: CancellationToken, scope: &Arc<CleanupScope>) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel(2);
    let scope = Arc::downgrade(scope);

    tokio::spawn(async move {
        tokio::select! {
            _ = forward_signals(tx) => {}
            _ = watch(rx, token, scope, force_exit) => {}
        }
    })
}

fn force_exit() {
    std::process::exit(FORCED_EXIT_CODE)
}

async fn forward_signals(tx: mpsc::Sender<()>) {
    let mut signals = match Signals::new() {
        Ok(signals) => signals,
        Err(err) => {
            error!(error = %err, "cannot listen for termination signals");
            return;
        }
    };
    while signals.recv().await.is_some() {
        if tx.send(()).await.is_err() {
            return;
        }
    }
}

/// Signal streams registered once, so deliveries between two waits are kept.
#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> Option<()> {
        tokio::select! {
            received = self.interrupt.recv() => received,
            received = self.terminate.recv() => received,
        }
    }
}

#[cfg(windows)]
struct Signals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl Signals {
    fn new() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    async fn recv(&mut self) -> Option<()> {
        self.ctrl_c.recv().await
    }
}

async fn watch<F>(
    mut signals: mpsc::Receiver<()>,
    token: CancellationToken,
    scope: Weak<CleanupScope>,
    exit: F,
) where
    F: FnOnce(),
{
    if signals.recv().await.is_none() {
        return;
    }
    warn!("interrupted, cancelling download (press Ctrl+C again to force quit)");
    token.cancel();

    if signals.recv().await.is_none() {
        return;
    }
    warn!("interrupted again, cleaning up and exiting");
    if let Some(scope) = scope.upgrade() {
        if let Err(errs) = scope.run_all() {
            error!(error = %errs, "cleanup failed");
        }
    }
    exit();
}

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Which part of a download a network failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Probe,
    Range(usize),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Probe => write!(f, "probe"),
            Stage::Range(index) => write!(f, "range #{}", index),
        }
    }
}

/// Why the server's `Accept-Ranges` answer was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptRanges {
    Missing,
    Unit(String),
}

impl fmt::Display for AcceptRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptRanges::Missing => write!(f, "response does not include Accept-Ranges header"),
            AcceptRanges::Unit(unit) => {
                write!(f, "the value of Accept-Ranges header is {:?}, not \"bytes\"", unit)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("transport error during {stage}: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },

    #[error("server does not support byte ranges: {0}")]
    RangesUnsupported(AcceptRanges),

    #[error("no content")]
    NoContent,

    #[error("unexpected status code during {stage}: {status}")]
    UnexpectedStatus { stage: Stage, status: StatusCode },

    #[error("range #{index} returned {actual} bytes, expected {expected}")]
    LengthMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },

    #[error("chunk #{0} is missing from the downloaded set")]
    MissingChunk(usize),

    #[error("chunk #{0} was not part of the plan")]
    UnexpectedChunk(usize),

    #[error("file already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("chunk task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("download cancelled")]
    Cancelled,

    #[error("download timed out after {}", pretty(.0))]
    TimedOut(Duration),
}

impl DownloadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DownloadError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transport(stage: Stage) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| DownloadError::Transport { stage, source }
    }

    /// True for outcomes caused by the shared cancellation token rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DownloadError::Cancelled | DownloadError::TimedOut(_))
    }
}

fn pretty(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;

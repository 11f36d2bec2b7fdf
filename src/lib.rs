//! Parallel ranged HTTP downloads.
//!
//! A download probes the server with HEAD, splits the content into byte ranges,
//! fetches every range concurrently into a scratch directory and concatenates the
//! pieces in order into the destination file.

pub mod downloader;
pub mod error;
pub mod opt;
pub mod server;
pub mod terminator;
pub mod utils;

#[cfg(test)]
mod testing;

pub use downloader::{DownloadOptions, Downloaded, Downloader};
pub use error::{DownloadError, Stage};

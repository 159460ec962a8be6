//! Sharelink Core Library
//!
//! Resolves document share links into direct download URLs and fetches the
//! files with resumable, verified, retried transfers.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - TOML configuration with validated defaults
//! - [`links`] - Link sources: links files and scraped pages
//! - [`resolver`] - Share link to [`DownloadTask`] resolution
//! - [`download`] - HTTP transfer engine and bounded batch orchestrator
//! - [`report`] - End-of-batch summary

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub(crate) mod html;
pub mod links;
pub mod report;
pub mod resolver;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, DownloaderConfig, ExportFormats};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DownloadEngine, DownloadError, DownloadResult,
    DownloadTask, EngineError, ErrorKind, FilenameResolver, HttpClient, RetryPolicy,
    TransferEngine,
};
pub use links::LinkSourceError;
pub use report::BatchSummary;
pub use resolver::{LinkResolver, ResolveError};

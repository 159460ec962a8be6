//! Download engine: turns resolved tasks into verified files on disk.
//!
//! # Features
//!
//! - One shared HTTP session with cookies for provider confirmation flows
//! - Header probe for size and filename hints
//! - `.part` staging files with HTTP range resume
//! - Confirmation page ("interstitial") detection and negotiation
//! - Byte-count verification before the final rename
//! - Retry with exponential backoff for transient failures
//! - Bounded worker pool with cooperative interruption
//!
//! # Example
//!
//! ```no_run
//! use sharelink_core::download::{
//!     ClientSettings, DownloadTask, FilenameResolver, HttpClient, RetryPolicy, TransferEngine,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(&ClientSettings::default())?;
//! let engine = TransferEngine::new(
//!     client,
//!     FilenameResolver::new("./downloads"),
//!     RetryPolicy::default(),
//! )?;
//! let task = DownloadTask::new(
//!     "https://drive.google.com/file/d/abc/view",
//!     "abc",
//!     "https://drive.google.com/uc?export=download&id=abc",
//!     "abc",
//! );
//! let result = engine.download(&task).await;
//! println!("{}", result.message);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod engine;
mod error;
mod filename;
pub mod interstitial;
mod retry;
mod task;
mod transfer;

pub use client::{BROWSER_USER_AGENT, ClientSettings, HttpClient, ProbeInfo};
pub use engine::{DEFAULT_CONCURRENCY, DownloadEngine, EngineError};
pub use error::{DownloadError, ErrorKind};
pub use filename::{
    FilenameResolver, Reservation, Resolution, build_filename, parse_content_disposition,
    partial_path_for, sanitize_filename,
};
pub use interstitial::{HtmlWithoutDisposition, InterstitialDetector};
pub use retry::{DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use task::{DownloadResult, DownloadTask};
pub use transfer::{OpenMode, TransferEngine, TransferState};


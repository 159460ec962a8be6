//! Constants for the download module (timeouts, buffering, on-disk conventions).

/// Default timeout for header-only probes and page fetches (30 seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default read timeout for streamed downloads (2 minutes between reads).
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// Default write buffer size for streamed bodies.
pub const CHUNK_SIZE: usize = 8192;

/// Suffix of the staging file that holds an incomplete transfer.
pub const PART_SUFFIX: &str = ".part";

/// Progress is logged every time this many bytes land when the total size is unknown.
pub const UNKNOWN_SIZE_PROGRESS_STEP: u64 = 16 * 1024 * 1024;

/// Progress is logged in steps of this many percent when the total size is known.
pub const PROGRESS_PERCENT_STEP: u64 = 10;

/// Host that serves provider confirmation endpoints.
pub const DEFAULT_CONFIRM_BASE_URL: &str = "https://drive.google.com";

/// Upper bound on bytes read from a suspected confirmation page.
pub const MAX_INTERSTITIAL_PAGE_BYTES: usize = 2 * 1024 * 1024;

/// Placeholder extension for files with neither a server name nor a task extension.
pub const PLACEHOLDER_EXTENSION: &str = ".download";

/// Longest sanitized filename, leaving room for `_<n>` and `.part`.
pub const MAX_FILENAME_LEN: usize = 240;

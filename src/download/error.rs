//! Error types for the download module.
//!
//! [`DownloadError`] carries the context (URL or path) needed for a useful
//! message, and [`ErrorKind`] groups the variants into the categories the
//! engine reports on each [`DownloadResult`](super::DownloadResult).

use std::path::PathBuf;

use thiserror::Error;

/// Coarse failure category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, connection resets, truncated streams. Retried by the engine.
    TransientTransport,
    /// A confirmation page was served but could not be negotiated.
    ConfirmationFailure,
    /// Local filesystem problem (permissions, disk full, rename collision).
    Filesystem,
    /// The server answered with a non-retryable status or a malformed URL was used.
    Http,
    /// The batch was cancelled before or while this task ran.
    Interrupted,
    /// The worker running the task died unexpectedly.
    Internal,
}

impl ErrorKind {
    /// Stable label used in logs and summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientTransport => "transient_transport",
            Self::ConfirmationFailure => "confirmation_failure",
            Self::Filesystem => "filesystem",
            Self::Http => "http",
            Self::Interrupted => "interrupted",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while transferring one file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, reset, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The body stream ended before the expected number of bytes arrived.
    #[error("download stream ended early for {path}: {received} of {expected} bytes")]
    Truncated {
        /// Partial file being written.
        path: PathBuf,
        /// Expected total size in bytes.
        expected: u64,
        /// Bytes present in the partial file when the stream ended.
        received: u64,
    },

    /// A 206 response started at a different offset than the one requested.
    #[error("server returned range starting at {actual} instead of {requested} for {url}")]
    RangeMismatch {
        /// The URL that was requested.
        url: String,
        /// Offset sent in the `Range` header.
        requested: u64,
        /// Offset reported by `Content-Range`.
        actual: u64,
    },

    /// A provider confirmation page could not be bypassed.
    #[error("confirmation bypass failed for {url}: {reason}")]
    Confirmation {
        /// The original share link.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// File system error during download (create file, write, rename, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The final path appeared while the transfer was running.
    #[error("cannot finish download: {path} already exists")]
    RenameCollision {
        /// The final path that was taken.
        path: PathBuf,
    },

    /// Completed size does not match the size the server announced.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Download path that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error, mapping timeouts to [`Self::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a truncated-stream error.
    pub fn truncated(path: impl Into<PathBuf>, expected: u64, received: u64) -> Self {
        Self::Truncated {
            path: path.into(),
            expected,
            received,
        }
    }

    /// Creates a confirmation bypass error.
    pub fn confirmation(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Confirmation {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Returns the reporting category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Truncated { .. }
            | Self::RangeMismatch { .. } => ErrorKind::TransientTransport,
            Self::Confirmation { .. } => ErrorKind::ConfirmationFailure,
            Self::Io { .. } | Self::RenameCollision { .. } | Self::Integrity { .. } => {
                ErrorKind::Filesystem
            }
            Self::HttpStatus { .. } | Self::InvalidUrl { .. } => ErrorKind::Http,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://example.com/file.pdf");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/file.pdf"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://example.com/file.pdf", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(
            msg.contains("https://example.com/file.pdf"),
            "Expected URL in: {msg}"
        );
    }

    #[test]
    fn test_download_error_truncated_display() {
        let error = DownloadError::truncated("/tmp/report.pdf.part", 1000, 600);
        let msg = error.to_string();
        assert!(msg.contains("600 of 1000"), "Expected byte counts in: {msg}");
        assert!(msg.contains("report.pdf.part"), "Expected path in: {msg}");
    }

    #[test]
    fn test_download_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/test.pdf"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/test.pdf"), "Expected path in: {msg}");
    }

    #[test]
    fn test_download_error_confirmation_display() {
        let error = DownloadError::confirmation(
            "https://drive.google.com/file/d/abc/view",
            "no confirmation link on page",
        );
        let msg = error.to_string();
        assert!(msg.contains("confirmation bypass failed"), "got: {msg}");
        assert!(msg.contains("no confirmation link"), "got: {msg}");
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            DownloadError::timeout("u").kind(),
            ErrorKind::TransientTransport
        );
        assert_eq!(
            DownloadError::truncated("p", 10, 5).kind(),
            ErrorKind::TransientTransport
        );
        assert_eq!(
            DownloadError::confirmation("u", "r").kind(),
            ErrorKind::ConfirmationFailure
        );
        assert_eq!(
            DownloadError::RenameCollision {
                path: PathBuf::from("p")
            }
            .kind(),
            ErrorKind::Filesystem
        );
        assert_eq!(DownloadError::http_status("u", 404).kind(), ErrorKind::Http);
        assert_eq!(DownloadError::invalid_url("u").kind(), ErrorKind::Http);
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::TransientTransport.to_string(), "transient_transport");
        assert_eq!(ErrorKind::Interrupted.as_str(), "interrupted");
    }
}

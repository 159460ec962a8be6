//! Task and result records exchanged between link resolution, the transfer
//! engine, and the batch orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use super::{DownloadError, ErrorKind};

/// One resolved unit of work: one URL to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// The share link as supplied by the user or scraper.
    pub original_link: String,
    /// Provider file identifier.
    pub resource_id: String,
    /// URL actually fetched.
    pub download_url: String,
    /// Base name used when the server supplies none.
    pub filename_hint: String,
    /// Suffix (with leading dot) appended when the chosen name lacks one.
    pub file_extension: Option<String>,
    /// Whether the server converts the document on the fly.
    pub is_export: bool,
    /// Export format requested from the provider, when `is_export`.
    pub export_format: Option<String>,
}

impl DownloadTask {
    /// Creates a plain (non-export) task with no extension.
    pub fn new(
        original_link: impl Into<String>,
        resource_id: impl Into<String>,
        download_url: impl Into<String>,
        filename_hint: impl Into<String>,
    ) -> Self {
        Self {
            original_link: original_link.into(),
            resource_id: resource_id.into(),
            download_url: download_url.into(),
            filename_hint: filename_hint.into(),
            file_extension: None,
            is_export: false,
            export_format: None,
        }
    }

    /// Sets the fallback extension; a missing leading dot is added.
    #[must_use]
    pub fn with_extension(mut self, extension: &str) -> Self {
        let extension = extension.trim();
        self.file_extension = if extension.is_empty() {
            None
        } else if extension.starts_with('.') {
            Some(extension.to_string())
        } else {
            Some(format!(".{extension}"))
        };
        self
    }

    /// Marks the task as a format-converted export.
    #[must_use]
    pub fn as_export(mut self, format: &str) -> Self {
        self.is_export = true;
        self.export_format = Some(format.to_string());
        self.with_extension(format)
    }
}

/// Outcome of one task. Every task submitted to a batch yields exactly one.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Identity of the task this result belongs to.
    pub original_link: String,
    /// True for completed and skipped tasks.
    pub success: bool,
    /// True when the file was already present and nothing was fetched.
    pub skipped: bool,
    /// Final path of the file, when one exists.
    pub filepath: Option<PathBuf>,
    /// Human-readable outcome.
    pub message: String,
    /// Failure category, `None` on success.
    pub error_kind: Option<ErrorKind>,
    /// The originating error, when the failure came from a transfer.
    pub error: Option<Arc<DownloadError>>,
    /// Transfer attempts made (0 when nothing was attempted).
    pub attempts: u32,
}

impl DownloadResult {
    /// A transfer that finished and was renamed into place.
    pub fn completed(task: &DownloadTask, path: PathBuf, bytes: u64, attempts: u32) -> Self {
        let message = format!("downloaded {} ({bytes} bytes)", path.display());
        Self {
            original_link: task.original_link.clone(),
            success: true,
            skipped: false,
            filepath: Some(path),
            message,
            error_kind: None,
            error: None,
            attempts,
        }
    }

    /// A task whose target was already complete on disk.
    pub fn skipped(task: &DownloadTask, path: PathBuf) -> Self {
        let message = format!("skipped, already present: {}", path.display());
        Self {
            original_link: task.original_link.clone(),
            success: true,
            skipped: true,
            filepath: Some(path),
            message,
            error_kind: None,
            error: None,
            attempts: 0,
        }
    }

    /// A task that failed with a transfer error.
    pub fn failed(task: &DownloadTask, error: DownloadError, attempts: u32) -> Self {
        Self {
            original_link: task.original_link.clone(),
            success: false,
            skipped: false,
            filepath: None,
            message: error.to_string(),
            error_kind: Some(error.kind()),
            error: Some(Arc::new(error)),
            attempts,
        }
    }

    /// A task that failed without a transfer error (cancellation, worker panic).
    pub fn aborted(
        original_link: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            original_link: original_link.into(),
            success: false,
            skipped: false,
            filepath: None,
            message: message.into(),
            error_kind: Some(kind),
            error: None,
            attempts: 0,
        }
    }

    /// A task that never ran, or was abandoned, because the batch was interrupted.
    pub fn interrupted(task: &DownloadTask) -> Self {
        Self::aborted(
            task.original_link.clone(),
            ErrorKind::Interrupted,
            "interrupted before completion",
        )
    }
}

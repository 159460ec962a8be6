//! End-of-batch reporting.

use std::path::Path;

use tracing::{error, info, warn};

use crate::download::{DownloadResult, ErrorKind};
use crate::resolver::ResolveError;

/// One task that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLink {
    /// The share link as the user supplied it.
    pub link: String,
    /// Why it failed.
    pub message: String,
}

/// Aggregated counts for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Tasks handed to the engine.
    pub total: usize,
    /// Files fetched in this run.
    pub downloaded: usize,
    /// Files already present before the run.
    pub skipped: usize,
    /// Tasks cut short by an interruption.
    pub interrupted: usize,
    /// Tasks that failed, interruptions included.
    pub failed: Vec<FailedLink>,
    /// Links that never became tasks.
    pub unresolved: Vec<FailedLink>,
}

impl BatchSummary {
    /// Tallies engine results.
    #[must_use]
    pub fn from_results(results: &[DownloadResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            if result.success {
                if result.skipped {
                    summary.skipped += 1;
                } else {
                    summary.downloaded += 1;
                }
                continue;
            }
            if result.error_kind == Some(ErrorKind::Interrupted) {
                summary.interrupted += 1;
            }
            summary.failed.push(FailedLink {
                link: result.original_link.clone(),
                message: result.message.clone(),
            });
        }
        summary
    }

    /// Records links that were dropped during resolution.
    #[must_use]
    pub fn with_unresolved(mut self, failures: &[ResolveError]) -> Self {
        self.unresolved = failures
            .iter()
            .map(|failure| FailedLink {
                link: failure.link().to_string(),
                message: failure.to_string(),
            })
            .collect();
        self
    }

    /// Tasks that ended with the file on disk.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.downloaded + self.skipped
    }

    /// True when any link failed to resolve or download.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.unresolved.is_empty()
    }

    /// The closing status line.
    #[must_use]
    pub fn format_message(&self) -> String {
        format!(
            "{}/{} tasks completed successfully",
            self.succeeded(),
            self.total
        )
    }

    /// Logs per-link failures and the totals.
    pub fn log(&self, download_dir: &Path) {
        for failure in &self.unresolved {
            warn!(link = %failure.link, "not downloaded: {}", failure.message);
        }
        for failure in &self.failed {
            error!(link = %failure.link, "failed: {}", failure.message);
        }

        info!(
            downloaded = self.downloaded,
            skipped = self.skipped,
            failed = self.failed.len(),
            interrupted = self.interrupted,
            unresolved = self.unresolved.len(),
            dir = %download_dir.display(),
            "batch finished"
        );

        if self.has_failures() {
            warn!("{}", self.format_message());
        } else {
            info!("{}", self.format_message());
        }
    }
}

//! Google Drive and Docs share links.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use super::ResolveError;
use crate::config::{ExportFormats, ExportKind};
use crate::download::DownloadTask;
use crate::html::compile_static_regex;

const DRIVE_DOWNLOAD_BASE: &str = "https://drive.google.com/uc?export=download&id=";
const DOCS_BASE: &str = "https://docs.google.com";

/// File ID patterns, tried in order.
static FILE_ID_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/file/d/([a-zA-Z0-9_-]+)",
        r"/document/d/([a-zA-Z0-9_-]+)",
        r"/spreadsheets/d/([a-zA-Z0-9_-]+)",
        r"/presentation/d/([a-zA-Z0-9_-]+)",
        r"[?&]id=([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .map(|pattern| compile_static_regex(pattern))
    .collect()
});

/// Extracts the provider file ID from a share link.
#[must_use]
pub fn extract_file_id(url: &str) -> Option<String> {
    FILE_ID_RES.iter().find_map(|re| {
        re.captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Shape of a recognized link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    File,
    Export(ExportKind),
}

impl LinkKind {
    fn detect(url: &str) -> Option<Self> {
        if url.contains("/file/d/") || url.contains("/open?id=") || url.contains("/uc?") {
            return Some(Self::File);
        }
        [
            ("/document/d/", ExportKind::Document),
            ("/spreadsheets/d/", ExportKind::Spreadsheet),
            ("/presentation/d/", ExportKind::Presentation),
        ]
        .iter()
        .find(|(marker, _)| url.contains(marker))
        .map(|(_, kind)| Self::Export(*kind))
    }
}

fn export_path_segment(kind: ExportKind) -> &'static str {
    match kind {
        ExportKind::Document => "document",
        ExportKind::Spreadsheet => "spreadsheets",
        ExportKind::Presentation => "presentation",
    }
}

/// Tasks and failures produced by [`LinkResolver::resolve_all`].
#[derive(Debug, Default)]
pub struct ResolvedLinks {
    /// Links that became tasks.
    pub tasks: Vec<DownloadTask>,
    /// Links that did not.
    pub failures: Vec<ResolveError>,
}

/// Turns share links into download tasks.
#[derive(Debug, Clone, Default)]
pub struct LinkResolver {
    formats: ExportFormats,
}

impl LinkResolver {
    /// Creates a resolver using `formats` for every export link.
    #[must_use]
    pub fn new(formats: ExportFormats) -> Self {
        Self { formats }
    }

    /// Resolves one link.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] for folder links, links without a file ID,
    /// and unrecognized link shapes.
    pub fn resolve(&self, link: &str) -> Result<DownloadTask, ResolveError> {
        if link.contains("/drive/folders/") {
            return Err(ResolveError::Folder {
                link: link.to_string(),
            });
        }

        let file_id = extract_file_id(link).ok_or_else(|| ResolveError::MissingFileId {
            link: link.to_string(),
        })?;

        let kind = LinkKind::detect(link).ok_or_else(|| ResolveError::Unsupported {
            link: link.to_string(),
        })?;

        let task = match kind {
            LinkKind::File => DownloadTask::new(
                link,
                file_id.as_str(),
                format!("{DRIVE_DOWNLOAD_BASE}{file_id}"),
                file_id.as_str(),
            ),
            LinkKind::Export(export) => {
                let format = self.formats.format_for(export);
                DownloadTask::new(
                    link,
                    file_id.as_str(),
                    format!(
                        "{DOCS_BASE}/{}/d/{file_id}/export?format={format}",
                        export_path_segment(export)
                    ),
                    file_id.as_str(),
                )
                .as_export(format)
            }
        };
        debug!(link, download_url = %task.download_url, "resolved link");
        Ok(task)
    }

    /// Resolves every link, keeping failures separate.
    #[must_use]
    pub fn resolve_all(&self, links: &[String]) -> ResolvedLinks {
        let mut resolved = ResolvedLinks::default();
        for link in links {
            match self.resolve(link) {
                Ok(task) => resolved.tasks.push(task),
                Err(error @ ResolveError::Folder { .. }) => {
                    info!(link = %link, "skipping folder link");
                    resolved.failures.push(error);
                }
                Err(error) => {
                    warn!(link = %link, error = %error, "skipping link");
                    resolved.failures.push(error);
                }
            }
        }
        resolved
    }
}

//! Link sources: a flat file of URLs, or a web page scraped for share links.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::download::{DownloadError, HttpClient};
use crate::html::anchor_hrefs;

/// Template written when the default links file does not exist yet.
const LINKS_FILE_TEMPLATE: &str = "\
# Add share URLs below, one per line. Lines starting with # are ignored.
# This file is read when neither --scrape-url nor --links-file is given
# and no scrape_url is set in the config file.
#
# Example file:
# https://drive.google.com/file/d/YOUR_FILE_ID_HERE/view?usp=sharing
# Example document (exported with the configured document format):
# https://docs.google.com/document/d/YOUR_DOC_ID_HERE/edit?usp=sharing
";

/// Errors raised while collecting links.
#[derive(Debug, Error)]
pub enum LinkSourceError {
    /// The links file could not be read or written.
    #[error("cannot access links file '{path}': {source}")]
    File {
        /// Path of the links file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The page to scrape is not a valid absolute URL.
    #[error("invalid page URL: {url}")]
    InvalidPageUrl {
        /// The rejected URL.
        url: String,
    },

    /// A link pattern is not a valid regex.
    #[error("invalid link pattern '{pattern}': {source}")]
    Pattern {
        /// The rejected pattern.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// The page could not be fetched.
    #[error("failed to fetch page: {0}")]
    Fetch(#[source] DownloadError),
}

/// Reads one URL per line; blank lines and `#` comments are skipped.
///
/// # Errors
///
/// Returns [`LinkSourceError::File`] if the file cannot be read.
pub fn read_links_file(path: &Path) -> Result<Vec<String>, LinkSourceError> {
    let raw = std::fs::read_to_string(path).map_err(|source| LinkSourceError::File {
        path: path.to_path_buf(),
        source,
    })?;
    let links: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect();
    info!(path = %path.display(), count = links.len(), "read links file");
    Ok(links)
}

/// Creates a commented template at `path` unless something already exists
/// there. Returns whether a file was written.
///
/// # Errors
///
/// Returns [`LinkSourceError::File`] if the file cannot be created.
pub fn write_default_links_file(path: &Path) -> Result<bool, LinkSourceError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| LinkSourceError::File {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, LINKS_FILE_TEMPLATE).map_err(|source| LinkSourceError::File {
        path: path.to_path_buf(),
        source,
    })?;
    warn!(path = %path.display(), "links file not found, created a template to fill in");
    Ok(true)
}

/// Compiles link patterns case-insensitively.
///
/// # Errors
///
/// Returns [`LinkSourceError::Pattern`] for the first invalid pattern.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, LinkSourceError> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| LinkSourceError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}

/// Collects anchor targets from `html` that match any of `patterns`.
///
/// Non-navigational schemes (`javascript:`, `mailto:`, `tel:`) are skipped,
/// relative targets are resolved against `page_url`, and fragments are
/// dropped. The result is sorted and free of duplicates.
#[must_use]
pub fn extract_links_from_html(html: &str, page_url: &Url, patterns: &[Regex]) -> Vec<String> {
    let mut found = BTreeSet::new();
    for href in anchor_hrefs(html) {
        let href = href.trim();
        let lower = href.to_ascii_lowercase();
        if href.is_empty()
            || ["javascript:", "mailto:", "tel:"]
                .iter()
                .any(|scheme| lower.starts_with(scheme))
        {
            continue;
        }

        let Ok(mut absolute) = page_url.join(href) else {
            debug!(href, "skipping unparseable link");
            continue;
        };
        absolute.set_fragment(None);
        let candidate = absolute.to_string();

        if patterns.iter().any(|re| re.is_match(&candidate)) {
            debug!(link = %candidate, "matched link");
            found.insert(candidate);
        }
    }
    found.into_iter().collect()
}

/// Fetches `page_url` and extracts matching links from it.
///
/// # Errors
///
/// Returns [`LinkSourceError`] for an invalid URL, invalid patterns, or a
/// failed fetch.
#[instrument(skip(client, patterns))]
pub async fn scrape_page(
    client: &HttpClient,
    page_url: &str,
    patterns: &[String],
) -> Result<Vec<String>, LinkSourceError> {
    let url = Url::parse(page_url).map_err(|_| LinkSourceError::InvalidPageUrl {
        url: page_url.to_string(),
    })?;
    let patterns = compile_patterns(patterns)?;
    let html = client
        .fetch_text(url.as_str())
        .await
        .map_err(LinkSourceError::Fetch)?;
    let links = extract_links_from_html(&html, &url, &patterns);
    info!(count = links.len(), "found matching links on page");
    Ok(links)
}

/// Sorts and de-duplicates links. Returns the unique list and the number of
/// duplicates removed.
#[must_use]
pub fn dedupe_links(links: Vec<String>) -> (Vec<String>, usize) {
    let total = links.len();
    let unique: Vec<String> = links.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    let removed = total - unique.len();
    (unique, removed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LINK_PATTERNS;
    use tempfile::TempDir;

    fn default_patterns() -> Vec<Regex> {
        let patterns: Vec<String> = DEFAULT_LINK_PATTERNS.iter().map(ToString::to_string).collect();
        compile_patterns(&patterns).unwrap()
    }

    #[test]
    fn test_read_links_file_skips_comments_and_blanks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.txt");
        std::fs::write(
            &path,
            "# comment\n\n  https://drive.google.com/file/d/a/view  \n\
             https://docs.google.com/document/d/b/edit\n",
        )
        .unwrap();

        let links = read_links_file(&path).unwrap();
        assert_eq!(
            links,
            vec![
                "https://drive.google.com/file/d/a/view".to_string(),
                "https://docs.google.com/document/d/b/edit".to_string(),
            ]
        );
    }

    #[test]
    fn test_read_links_file_missing() {
        let dir = TempDir::new().unwrap();
        let error = read_links_file(&dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(error, LinkSourceError::File { .. }));
    }

    #[test]
    fn test_write_default_links_file_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.txt");

        assert!(write_default_links_file(&path).unwrap());
        assert!(!write_default_links_file(&path).unwrap());
        assert!(read_links_file(&path).unwrap().is_empty());
    }

    #[test]
    fn test_extract_links_filters_and_normalizes() {
        let page = Url::parse("https://sites.example.edu/course/").unwrap();
        let html = r#"
            <a href="https://drive.google.com/file/d/AAA/view#top">slides</a>
            <a href="https://DOCS.google.com/document/d/BBB/edit">notes</a>
            <a href="//drive.google.com/open?id=CCC">scheme-relative</a>
            <a href="mailto:prof@example.edu">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="/syllabus.html">syllabus</a>
            <a href="https://drive.google.com/file/d/AAA/view">duplicate</a>
        "#;

        let links = extract_links_from_html(html, &page, &default_patterns());
        assert_eq!(
            links,
            vec![
                "https://docs.google.com/document/d/BBB/edit".to_string(),
                "https://drive.google.com/file/d/AAA/view".to_string(),
                "https://drive.google.com/open?id=CCC".to_string(),
            ]
        );
    }

    #[test]
    fn test_compile_patterns_rejects_invalid() {
        let error = compile_patterns(&["(".to_string()]).unwrap_err();
        assert!(matches!(error, LinkSourceError::Pattern { .. }));
    }

    #[test]
    fn test_dedupe_links_counts_removed() {
        let (unique, removed) = dedupe_links(vec![
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
        ]);
        assert_eq!(unique, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(removed, 1);
    }
}

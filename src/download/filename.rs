//! Filename sanitization, collision handling, and target-path reservation.
//!
//! [`FilenameResolver`] turns a task plus an optional server hint into a
//! unique path inside the download directory. Uniqueness is checked against
//! the final path only, never against `.part` staging files.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;
use tracing::debug;

use super::constants::{MAX_FILENAME_LEN, PART_SUFFIX, PLACEHOLDER_EXTENSION};
use super::{DownloadError, DownloadTask};

const FALLBACK_NAME: &str = "unnamed_file";

/// Parses Content-Disposition header to extract filename.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987, takes precedence)
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    let lower = header.to_ascii_lowercase();

    if let Some(pos) = lower.find("filename*=") {
        let value = header[pos + 10..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim().trim_matches('"');
            if let Ok(decoded) = urlencoding::decode(encoded_name)
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        }
    }

    // Skip over any `filename*=` occurrence when looking for the plain form.
    let plain = lower
        .match_indices("filename=")
        .map(|(pos, _)| pos)
        .find(|&pos| pos == 0 || lower.as_bytes()[pos - 1] != b'*')?;
    let value = header[plain + 9..].trim();

    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        let name = &stripped[..end];
        return (!name.is_empty()).then(|| name.to_string());
    }

    let end = value.find(';').unwrap_or(value.len());
    let name = value[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Makes a name safe for common filesystems.
///
/// Strips directory components, removes `\ / * ? : " < > |` and control
/// characters, collapses runs of whitespace and underscores into one `_`, and
/// truncates to [`MAX_FILENAME_LEN`] characters keeping the extension.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let mut out = String::with_capacity(base.len());
    let mut prev_sep = false;
    for ch in base.chars() {
        match ch {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => {}
            c if c.is_control() && !c.is_whitespace() => {}
            c if c.is_whitespace() || c == '_' => {
                if !prev_sep {
                    out.push('_');
                    prev_sep = true;
                }
            }
            c => {
                out.push(c);
                prev_sep = false;
            }
        }
    }
    let trimmed = out.trim_matches('_');

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return FALLBACK_NAME.to_string();
    }

    if trimmed.chars().count() <= MAX_FILENAME_LEN {
        return trimmed.to_string();
    }

    let (stem, ext) = split_extension(trimmed);
    let keep = MAX_FILENAME_LEN.saturating_sub(ext.chars().count());
    let truncated: String = stem.chars().take(keep).collect();
    debug!(original = name, "truncated long filename");
    format!("{truncated}{ext}")
}

/// Splits `name` into stem and extension (with the dot). Leading-dot names
/// such as `.profile` have no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

fn has_extension(name: &str) -> bool {
    !split_extension(name).1.is_empty()
}

/// Builds the sanitized base filename for a task.
///
/// A server hint wins over the task's own hint; the task extension is only
/// appended when the chosen name has none.
#[must_use]
pub fn build_filename(task: &DownloadTask, server_hint: Option<&str>) -> String {
    let server_hint = server_hint.map(str::trim).filter(|hint| !hint.is_empty());

    let raw = match server_hint {
        Some(hint) => {
            let hint = sanitize_filename(hint);
            match &task.file_extension {
                Some(ext) if !has_extension(&hint) => format!("{hint}{ext}"),
                _ => hint,
            }
        }
        None => {
            let ext = task
                .file_extension
                .as_deref()
                .unwrap_or(PLACEHOLDER_EXTENSION);
            format!("{}{ext}", sanitize_filename(&task.filename_hint))
        }
    };
    sanitize_filename(&raw)
}

/// Returns the staging path for `target` (`target` + `.part`).
#[must_use]
pub fn partial_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

fn candidate_name(filename: &str, index: usize) -> String {
    if index == 0 {
        return filename.to_string();
    }
    let (stem, ext) = split_extension(filename);
    format!("{stem}_{index}{ext}")
}

/// Outcome of [`FilenameResolver::reserve`].
#[derive(Debug)]
pub enum Resolution {
    /// A candidate on disk already has the expected size.
    AlreadyPresent(PathBuf),
    /// A free path was reserved for this task.
    Reserved(Reservation),
}

/// Exclusive claim on a target path, released on drop.
#[derive(Debug)]
pub struct Reservation {
    filename: String,
    path: PathBuf,
    reserved: Arc<DashSet<PathBuf>>,
    claimed: Arc<DashSet<PathBuf>>,
}

impl Reservation {
    /// The chosen filename.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The final target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `.part` staging path.
    #[must_use]
    pub fn partial_path(&self) -> PathBuf {
        partial_path_for(&self.path)
    }

    /// Marks the target as written by this batch and releases the claim.
    ///
    /// A completed path is never offered to another task as already present.
    pub fn complete(self) {
        self.claimed.insert(self.path.clone());
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.reserved.remove(&self.path);
    }
}

/// Maps tasks to unique paths inside one download directory.
///
/// Clones share the same registries, so every worker of a batch must use
/// clones of a single resolver. `reserved` holds paths of in-flight tasks;
/// `claimed` holds paths this batch already wrote or reported as present.
#[derive(Debug, Clone)]
pub struct FilenameResolver {
    dir: PathBuf,
    reserved: Arc<DashSet<PathBuf>>,
    claimed: Arc<DashSet<PathBuf>>,
}

impl FilenameResolver {
    /// Creates a resolver for `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            reserved: Arc::new(DashSet::new()),
            claimed: Arc::new(DashSet::new()),
        }
    }

    /// The download directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `name.ext`, `name_1.ext`, `name_2.ext`, ... inside the download directory.
    fn candidates<'a>(&'a self, filename: &'a str) -> impl Iterator<Item = (String, PathBuf)> + 'a {
        (0..).map(move |index| {
            let name = candidate_name(filename, index);
            let path = self.dir.join(&name);
            (name, path)
        })
    }

    /// Returns `(filename, path)` for the first candidate that does not exist
    /// on disk.
    ///
    /// Side-effect free: only inspects the filesystem and ignores in-flight
    /// reservations. An existing directory ends the search and is returned.
    /// [`reserve`](Self::reserve) walks the same candidates for the engine.
    #[must_use]
    pub fn resolve(&self, task: &DownloadTask, server_hint: Option<&str>) -> (String, PathBuf) {
        let filename = build_filename(task, server_hint);
        self.candidates(&filename)
            .find(|(_, path)| !path.exists() || path.is_dir())
            .unwrap_or_else(|| (filename.clone(), self.dir.join(&filename)))
    }

    /// Walks the same candidates as [`resolve`](Self::resolve) and either
    /// reports a completed file or claims the first free path.
    ///
    /// An existing candidate counts as complete when its size equals a known
    /// positive `expected_size`, or when it is empty and the expected size is
    /// unknown or zero. Other existing files are left untouched and skipped,
    /// as are paths reserved by in-flight tasks and paths this batch already
    /// claimed, so two same-named files never collapse into one.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when a candidate cannot be inspected or
    /// is a directory.
    pub fn reserve(
        &self,
        task: &DownloadTask,
        server_hint: Option<&str>,
        expected_size: Option<u64>,
    ) -> Result<Resolution, DownloadError> {
        let filename = build_filename(task, server_hint);
        for (name, path) in self.candidates(&filename) {
            if self.reserved.contains(&path) || self.claimed.contains(&path) {
                continue;
            }

            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => {
                    return Err(DownloadError::io(
                        path,
                        io::Error::new(io::ErrorKind::IsADirectory, "target path is a directory"),
                    ));
                }
                Ok(meta) => {
                    let size = meta.len();
                    let complete = match expected_size {
                        Some(expected) if expected > 0 => size == expected,
                        _ => size == 0,
                    };
                    if complete && self.claimed.insert(path.clone()) {
                        return Ok(Resolution::AlreadyPresent(path));
                    }
                    debug!(
                        path = %path.display(),
                        size,
                        expected = ?expected_size,
                        "existing file does not match, trying next name"
                    );
                }
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    if self.reserved.insert(path.clone()) {
                        return Ok(Resolution::Reserved(Reservation {
                            filename: name,
                            path,
                            reserved: Arc::clone(&self.reserved),
                            claimed: Arc::clone(&self.claimed),
                        }));
                    }
                }
                Err(error) => return Err(DownloadError::io(path, error)),
            }
        }
        Err(DownloadError::io(
            self.dir.join(&filename),
            io::Error::other("no free filename candidate"),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn task(hint: &str) -> DownloadTask {
        DownloadTask::new("https://example.com/share", hint, "https://example.com/dl", hint)
    }

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file:name.pdf"), "filename.pdf");
        assert_eq!(sanitize_filename("a*b?c\"d<e>f|g.pdf"), "abcdefg.pdf");
    }

    #[test]
    fn test_sanitize_filename_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\report.docx"), "report.docx");
    }

    #[test]
    fn test_sanitize_filename_collapses_whitespace_and_underscores() {
        assert_eq!(sanitize_filename("  my   big__file .pdf"), "my_big_file_.pdf");
        assert_eq!(sanitize_filename("__x__"), "x");
    }

    #[test]
    fn test_sanitize_filename_fallback() {
        assert_eq!(sanitize_filename(""), "unnamed_file");
        assert_eq!(sanitize_filename("???"), "unnamed_file");
        assert_eq!(sanitize_filename(".."), "unnamed_file");
    }

    #[test]
    fn test_sanitize_filename_truncates_preserving_extension() {
        let long = format!("{}.pdf", "a".repeat(400));
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized.chars().count(), MAX_FILENAME_LEN);
        assert!(sanitized.ends_with(".pdf"));
    }

    #[test]
    fn test_sanitize_filename_preserves_unicode() {
        assert_eq!(sanitize_filename("日本語.pdf"), "日本語.pdf");
    }

    #[test]
    fn test_parse_content_disposition_quoted() {
        let header = r#"attachment; filename="example.pdf""#;
        assert_eq!(parse_content_disposition(header), Some("example.pdf".to_string()));
    }

    #[test]
    fn test_parse_content_disposition_unquoted() {
        let header = "attachment; filename=example.pdf; size=10";
        assert_eq!(parse_content_disposition(header), Some("example.pdf".to_string()));
    }

    #[test]
    fn test_parse_content_disposition_rfc5987_preferred() {
        let header =
            r#"attachment; filename="fallback.pdf"; filename*=UTF-8''na%C3%AFve%20report.pdf"#;
        assert_eq!(
            parse_content_disposition(header),
            Some("naïve report.pdf".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_missing() {
        assert_eq!(parse_content_disposition("inline"), None);
        assert_eq!(parse_content_disposition(r#"attachment; filename="""#), None);
    }

    #[test]
    fn test_build_filename_server_hint_keeps_own_extension() {
        let task = task("abc").with_extension("pdf");
        assert_eq!(build_filename(&task, Some("Report.docx")), "Report.docx");
    }

    #[test]
    fn test_build_filename_server_hint_without_extension() {
        let task = task("abc").with_extension("pdf");
        assert_eq!(build_filename(&task, Some("Quarterly Report")), "Quarterly_Report.pdf");
    }

    #[test]
    fn test_build_filename_fallback_hint() {
        assert_eq!(build_filename(&task("abc").with_extension("xlsx"), None), "abc.xlsx");
        assert_eq!(build_filename(&task("abc"), None), "abc.download");
        assert_eq!(build_filename(&task("abc"), Some("   ")), "abc.download");
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path_for(Path::new("/tmp/a.pdf")),
            PathBuf::from("/tmp/a.pdf.part")
        );
    }

    #[test]
    fn test_resolve_appends_numeric_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("a_1.pdf"), b"x").unwrap();

        let resolver = FilenameResolver::new(dir.path());
        let (name, path) = resolver.resolve(&task("a").with_extension("pdf"), None);
        assert_eq!(name, "a_2.pdf");
        assert_eq!(path, dir.path().join("a_2.pdf"));
    }

    #[test]
    fn test_resolve_ignores_partial_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf.part"), b"xx").unwrap();

        let resolver = FilenameResolver::new(dir.path());
        let (name, _) = resolver.resolve(&task("a").with_extension("pdf"), None);
        assert_eq!(name, "a.pdf");
    }

    #[test]
    fn test_reserve_reports_matching_file_as_present() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), vec![0u8; 10]).unwrap();

        let resolver = FilenameResolver::new(dir.path());
        let resolution = resolver
            .reserve(&task("a").with_extension("pdf"), None, Some(10))
            .unwrap();
        assert!(
            matches!(resolution, Resolution::AlreadyPresent(p) if p == dir.path().join("a.pdf"))
        );
    }

    #[test]
    fn test_reserve_empty_file_unknown_size_is_present() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"").unwrap();

        let resolver = FilenameResolver::new(dir.path());
        let resolution = resolver
            .reserve(&task("a").with_extension("pdf"), None, None)
            .unwrap();
        assert!(matches!(resolution, Resolution::AlreadyPresent(_)));
    }

    #[test]
    fn test_reserve_mismatched_file_is_kept_and_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), vec![1u8; 5]).unwrap();

        let resolver = FilenameResolver::new(dir.path());
        let resolution = resolver
            .reserve(&task("a").with_extension("pdf"), None, Some(10))
            .unwrap();
        match resolution {
            Resolution::Reserved(reservation) => {
                assert_eq!(reservation.filename(), "a_1.pdf");
            }
            Resolution::AlreadyPresent(_) => panic!("mismatched size must not count as present"),
        }
        assert_eq!(std::fs::read(dir.path().join("a.pdf")).unwrap().len(), 5);
    }

    #[test]
    fn test_reserve_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let resolver = FilenameResolver::new(dir.path());
        let task = task("a").with_extension("pdf");

        let Resolution::Reserved(first) = resolver.reserve(&task, None, Some(10)).unwrap() else {
            panic!("expected reservation");
        };
        let Resolution::Reserved(second) = resolver.clone().reserve(&task, None, Some(10)).unwrap()
        else {
            panic!("expected reservation");
        };
        assert_eq!(first.path(), dir.path().join("a.pdf"));
        assert_eq!(second.path(), dir.path().join("a_1.pdf"));
        assert_eq!(second.partial_path(), dir.path().join("a_1.pdf.part"));

        drop(first);
        let Resolution::Reserved(third) = resolver.reserve(&task, None, Some(10)).unwrap() else {
            panic!("expected reservation");
        };
        assert_eq!(third.path(), dir.path().join("a.pdf"));
    }

    #[test]
    fn test_reserve_never_reports_a_path_completed_in_this_batch() {
        let dir = TempDir::new().unwrap();
        let resolver = FilenameResolver::new(dir.path());
        let task = task("same").with_extension("pdf");

        let Resolution::Reserved(first) = resolver.reserve(&task, None, Some(100)).unwrap() else {
            panic!("expected reservation");
        };
        std::fs::write(first.path(), [1u8; 100]).unwrap();
        first.complete();

        let Resolution::Reserved(second) = resolver.reserve(&task, None, Some(100)).unwrap() else {
            panic!("a file written by this batch must not count as present");
        };
        assert_eq!(second.path(), dir.path().join("same_1.pdf"));
    }

    #[test]
    fn test_reserve_present_file_is_claimed_once_per_batch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("same.pdf"), [1u8; 100]).unwrap();
        std::fs::write(dir.path().join("same_1.pdf"), [2u8; 100]).unwrap();
        let task = task("same").with_extension("pdf");

        let resolver = FilenameResolver::new(dir.path());
        let first = resolver.reserve(&task, None, Some(100)).unwrap();
        let second = resolver.reserve(&task, None, Some(100)).unwrap();

        assert!(matches!(first, Resolution::AlreadyPresent(p) if p == dir.path().join("same.pdf")));
        assert!(
            matches!(second, Resolution::AlreadyPresent(p) if p == dir.path().join("same_1.pdf"))
        );

        // A new batch starts with no claims.
        let fresh = FilenameResolver::new(dir.path());
        assert!(matches!(
            fresh.reserve(&task, None, Some(100)).unwrap(),
            Resolution::AlreadyPresent(p) if p == dir.path().join("same.pdf")
        ));
    }

    #[test]
    fn test_resolve_and_reserve_walk_the_same_candidates() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        let resolver = FilenameResolver::new(dir.path());
        let task = task("a").with_extension("pdf");

        let (name, path) = resolver.resolve(&task, None);
        let Resolution::Reserved(reservation) = resolver.reserve(&task, None, Some(10)).unwrap()
        else {
            panic!("expected reservation");
        };
        assert_eq!(reservation.filename(), name);
        assert_eq!(reservation.path(), path);
    }

    #[test]
    fn test_reserve_directory_candidate_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("a.pdf")).unwrap();

        let resolver = FilenameResolver::new(dir.path());
        let error = resolver
            .reserve(&task("a").with_extension("pdf"), None, None)
            .unwrap_err();
        assert!(matches!(error, DownloadError::Io { .. }));
    }
}

//! TOML configuration for the downloader.
//!
//! Every field has a default, so an empty or partial file is valid. The
//! binary layers CLI flags over the loaded values.
//!
//! ```toml
//! download_dir = "downloaded_files"
//! max_workers = 5
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//!
//! [export]
//! document = "pdf"
//! spreadsheet = "xlsx"
//! presentation = "pptx"
//! ```

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::download::constants::{
    CHUNK_SIZE, DEFAULT_CONFIRM_BASE_URL, DOWNLOAD_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS,
};
use crate::download::{BROWSER_USER_AGENT, ClientSettings, DEFAULT_CONCURRENCY, RetryPolicy};

/// Directory name used under the user's config directory.
const CONFIG_DIR_NAME: &str = "sharelink-dl";

/// Largest accepted timeout value (one day).
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Allowed export formats for text documents.
pub const VALID_DOCUMENT_FORMATS: &[&str] = &["pdf", "docx", "odt", "rtf", "txt", "html", "epub"];

/// Allowed export formats for spreadsheets.
pub const VALID_SPREADSHEET_FORMATS: &[&str] = &["pdf", "xlsx", "ods", "csv", "tsv", "html"];

/// Allowed export formats for presentations.
pub const VALID_PRESENTATION_FORMATS: &[&str] = &["pdf", "pptx", "odp", "txt"];

/// Default link patterns used when scraping a page.
pub const DEFAULT_LINK_PATTERNS: &[&str] = &[
    r"drive\.google\.com/(?:file/d/|open\?id=|uc\?id=)([a-zA-Z0-9_-]+)",
    r"docs\.google\.com/(?:document|spreadsheets|presentation)/d/([a-zA-Z0-9_-]+)",
];

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown keys.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected: {expected}")]
    Invalid {
        /// Dotted name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Description of the accepted values.
        expected: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}

/// Kinds of documents the provider converts on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Text documents.
    Document,
    /// Spreadsheets.
    Spreadsheet,
    /// Slide decks.
    Presentation,
}

impl ExportKind {
    /// Formats the provider accepts for this kind.
    #[must_use]
    pub fn valid_formats(self) -> &'static [&'static str] {
        match self {
            Self::Document => VALID_DOCUMENT_FORMATS,
            Self::Spreadsheet => VALID_SPREADSHEET_FORMATS,
            Self::Presentation => VALID_PRESENTATION_FORMATS,
        }
    }

    fn field(self) -> &'static str {
        match self {
            Self::Document => "export.document",
            Self::Spreadsheet => "export.spreadsheet",
            Self::Presentation => "export.presentation",
        }
    }
}

/// Export format chosen per document kind, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportFormats {
    /// Format for text documents.
    pub document: String,
    /// Format for spreadsheets.
    pub spreadsheet: String,
    /// Format for slide decks.
    pub presentation: String,
}

impl Default for ExportFormats {
    fn default() -> Self {
        Self {
            document: "pdf".to_string(),
            spreadsheet: "xlsx".to_string(),
            presentation: "pptx".to_string(),
        }
    }
}

impl ExportFormats {
    /// Format configured for `kind`.
    #[must_use]
    pub fn format_for(&self, kind: ExportKind) -> &str {
        match kind {
            ExportKind::Document => &self.document,
            ExportKind::Spreadsheet => &self.spreadsheet,
            ExportKind::Presentation => &self.presentation,
        }
    }

    /// Lower-cases every format and checks it against the allowed lists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first unsupported format.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        for kind in [
            ExportKind::Document,
            ExportKind::Spreadsheet,
            ExportKind::Presentation,
        ] {
            let slot = match kind {
                ExportKind::Document => &mut self.document,
                ExportKind::Spreadsheet => &mut self.spreadsheet,
                ExportKind::Presentation => &mut self.presentation,
            };
            let normalized = slot.trim().to_ascii_lowercase();
            if !kind.valid_formats().contains(&normalized.as_str()) {
                return Err(ConfigError::invalid(
                    kind.field(),
                    slot.as_str(),
                    format!("one of {}", kind.valid_formats().join(", ")),
                ));
            }
            *slot = normalized;
        }
        Ok(())
    }
}

/// Retry policy parameters (`[retry]` section).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of attempts per task (including the first).
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter in milliseconds.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 32_000,
            jitter_ms: 250,
        }
    }
}

impl RetryConfig {
    /// Builds the retry policy described by this section.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            2.0,
        )
        .with_jitter(Duration::from_millis(self.jitter_ms))
    }
}

/// Global configuration loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloaderConfig {
    /// Directory receiving downloaded files.
    pub download_dir: PathBuf,
    /// Number of parallel transfers.
    pub max_workers: usize,
    /// Links file read when no other source is given.
    pub links_file: PathBuf,
    /// Page scraped for links when no CLI source is given.
    pub scrape_url: Option<String>,
    /// Regexes selecting links when scraping a page.
    pub link_patterns: Vec<String>,
    /// Timeout for probes and page fetches, in seconds.
    pub request_timeout_secs: u64,
    /// Maximum idle time while streaming a download, in seconds.
    pub download_timeout_secs: u64,
    /// Write buffer size in bytes.
    pub chunk_size: usize,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Host that relative confirmation targets are resolved against.
    pub confirm_base_url: String,
    /// Overall batch timeout in seconds.
    pub batch_timeout_secs: Option<u64>,
    /// Default log filter when neither `RUST_LOG` nor verbosity flags are set.
    pub log_level: Option<String>,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Export formats.
    pub export: ExportFormats,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloaded_files"),
            max_workers: DEFAULT_CONCURRENCY,
            links_file: PathBuf::from("links.txt"),
            scrape_url: None,
            link_patterns: DEFAULT_LINK_PATTERNS.iter().map(ToString::to_string).collect(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            download_timeout_secs: DOWNLOAD_TIMEOUT_SECS,
            chunk_size: CHUNK_SIZE,
            user_agent: BROWSER_USER_AGENT.to_string(),
            confirm_base_url: DEFAULT_CONFIRM_BASE_URL.to_string(),
            batch_timeout_secs: None,
            log_level: None,
            retry: RetryConfig::default(),
            export: ExportFormats::default(),
        }
    }
}

impl DownloaderConfig {
    /// Parses a TOML document without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads, parses, and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw, path)?;
        config.validate()?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Loads the default config file if it exists, otherwise built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an existing default file is invalid.
    pub fn load_default() -> Result<Self, ConfigError> {
        match resolve_default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Checks ranges and normalizes export formats.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.max_workers) {
            return Err(ConfigError::invalid("max_workers", self.max_workers, "1..=100"));
        }
        if !(1..=10).contains(&self.retry.max_attempts) {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                self.retry.max_attempts,
                "1..=10",
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                self.retry.max_delay_ms,
                format!(">= retry.base_delay_ms ({})", self.retry.base_delay_ms),
            ));
        }
        validate_timeout_secs("request_timeout_secs", Some(self.request_timeout_secs))?;
        validate_timeout_secs("download_timeout_secs", Some(self.download_timeout_secs))?;
        validate_timeout_secs("batch_timeout_secs", self.batch_timeout_secs)?;
        if self.chunk_size == 0 {
            return Err(ConfigError::invalid("chunk_size", self.chunk_size, "> 0"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::invalid("user_agent", "\"\"", "a non-empty string"));
        }
        if url::Url::parse(&self.confirm_base_url).is_err() {
            return Err(ConfigError::invalid(
                "confirm_base_url",
                &self.confirm_base_url,
                "an absolute URL",
            ));
        }
        for pattern in &self.link_patterns {
            if Regex::new(pattern).is_err() {
                return Err(ConfigError::invalid("link_patterns", pattern, "valid regexes"));
            }
        }
        self.export.normalize()
    }

    /// HTTP client settings derived from this config.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            user_agent: self.user_agent.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            read_timeout: Duration::from_secs(self.download_timeout_secs),
        }
    }

    /// Overall batch timeout, if configured.
    #[must_use]
    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }
}

fn validate_timeout_secs(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    match value {
        Some(secs) if !(1..=MAX_TIMEOUT_SECS).contains(&secs) => Err(ConfigError::invalid(
            field,
            secs,
            format!("1..={MAX_TIMEOUT_SECS}"),
        )),
        _ => Ok(()),
    }
}

/// Resolves the default config file path:
/// 1. `$XDG_CONFIG_HOME/sharelink-dl/config.toml`
/// 2. `$HOME/.config/sharelink-dl/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    config_path_from(env_var_non_empty_os("XDG_CONFIG_HOME"), env_var_non_empty_os("HOME"))
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    if let Some(xdg_config_home) = xdg_config_home {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join("config.toml"),
        );
    }

    let home = home?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(raw: &str) -> Result<DownloaderConfig, ConfigError> {
        let mut config = DownloaderConfig::from_toml_str(raw, Path::new("config.toml"))?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_default_config_values() {
        let cfg = DownloaderConfig::default();
        assert_eq!(cfg.download_dir, PathBuf::from("downloaded_files"));
        assert_eq!(cfg.max_workers, 5);
        assert_eq!(cfg.links_file, PathBuf::from("links.txt"));
        assert_eq!(cfg.request_timeout_secs, 30);
        assert_eq!(cfg.download_timeout_secs, 120);
        assert_eq!(cfg.chunk_size, 8192);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.export.spreadsheet, "xlsx");
        assert_eq!(cfg.link_patterns.len(), 2);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(parse("").unwrap(), DownloaderConfig::default());
    }

    #[test]
    fn test_custom_values() {
        let cfg = parse(
            r#"
            download_dir = "out"
            max_workers = 8
            scrape_url = "https://example.com/course"
            batch_timeout_secs = 600

            [retry]
            max_attempts = 5
            base_delay_ms = 100

            [export]
            document = "DOCX"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.download_dir, PathBuf::from("out"));
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.scrape_url.as_deref(), Some("https://example.com/course"));
        assert_eq!(cfg.batch_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.max_delay_ms, 32_000);
        assert_eq!(cfg.export.document, "docx");
        assert_eq!(cfg.export.presentation, "pptx");
        assert_eq!(cfg.retry.policy().max_attempts(), 5);
    }

    #[test]
    fn test_rejects_out_of_range_workers() {
        let error = parse("max_workers = 0").unwrap_err();
        let msg = error.to_string();
        assert!(msg.contains("`max_workers`"), "got: {msg}");
        assert!(msg.contains("1..=100"), "got: {msg}");
    }

    #[test]
    fn test_rejects_invalid_export_format() {
        let error = parse("[export]\nspreadsheet = \"docx\"").unwrap_err();
        assert!(matches!(
            error,
            ConfigError::Invalid {
                field: "export.spreadsheet",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_key() {
        let error = parse("max_wrokers = 3").unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_rejects_bad_pattern_and_timeout() {
        assert!(parse("link_patterns = [\"(unclosed\"]").is_err());
        assert!(parse("request_timeout_secs = 0").is_err());
        assert!(parse("[retry]\nbase_delay_ms = 5000\nmax_delay_ms = 10").is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_workers = 2\n").unwrap();
        assert_eq!(DownloaderConfig::load(&path).unwrap().max_workers, 2);
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let error = DownloaderConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(error, ConfigError::Read { .. }));
    }

    #[test]
    fn test_config_path_prefers_xdg() {
        let path = config_path_from(Some("/xdg".into()), Some("/home/u".into())).unwrap();
        assert_eq!(path, PathBuf::from("/xdg/sharelink-dl/config.toml"));
    }

    #[test]
    fn test_config_path_falls_back_to_home() {
        let path = config_path_from(None, Some("/home/u".into())).unwrap();
        assert_eq!(path, PathBuf::from("/home/u/.config/sharelink-dl/config.toml"));
        assert!(config_path_from(None, None).is_none());
    }
}

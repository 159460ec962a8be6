//! Shared HTTP session for probes, page fetches, and streamed downloads.
//!
//! One [`HttpClient`] is built per batch and cloned into every worker. Its
//! cookie jar is what lets a provider confirmation flow see the cookies set
//! by the request that served the confirmation page.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, ClientBuilder, Response};
use tracing::{debug, instrument};
use url::Url;

use super::DownloadError;
use super::constants::{DOWNLOAD_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::filename::parse_content_disposition;

/// Browser User-Agent sent with every request. Some providers serve a
/// degraded page to unknown clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Connection and timeout settings for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Timeout for HEAD probes and page fetches, also used as connect timeout.
    pub request_timeout: Duration,
    /// Maximum idle time between two reads of a streamed body.
    pub read_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user_agent: BROWSER_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
        }
    }
}

/// Result of a header-only probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Size announced by `Content-Length`, when present.
    pub content_length: Option<u64>,
    /// Filename announced by `Content-Disposition`, when present.
    pub filename: Option<String>,
    /// Raw response headers, for callers that classify the response.
    pub headers: HeaderMap,
}

/// HTTP session shared by all workers of a batch.
///
/// Cloning is cheap: clones share the connection pool and the cookie jar.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    jar: Arc<Jar>,
    request_timeout: Duration,
}

impl HttpClient {
    /// Builds a client with a fresh cookie jar.
    ///
    /// # Errors
    ///
    /// Returns the builder error when the TLS backend cannot be initialized.
    pub fn new(settings: &ClientSettings) -> Result<Self, reqwest::Error> {
        Self::with_cookie_jar(settings, Arc::new(Jar::default()))
    }

    /// Builds a client around an existing cookie jar.
    ///
    /// # Errors
    ///
    /// Returns the builder error when the TLS backend cannot be initialized.
    #[instrument(level = "debug", skip(jar))]
    pub fn with_cookie_jar(
        settings: &ClientSettings,
        jar: Arc<Jar>,
    ) -> Result<Self, reqwest::Error> {
        let client = base_client_builder(settings, Arc::clone(&jar)).build()?;
        Ok(Self {
            client,
            jar,
            request_timeout: settings.request_timeout,
        })
    }

    /// The cookie jar backing this session.
    #[must_use]
    pub fn cookie_jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// Issues a HEAD request and reads size and filename hints.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for invalid URLs, transport failures, and
    /// non-success statuses.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
        let parsed = parse_url(url)?;
        let response = self
            .client
            .head(parsed)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        let response = check_status(url, response)?;

        let headers = response.headers().clone();
        let info = ProbeInfo {
            content_length: header_content_length(&headers),
            filename: header_filename(&headers),
            headers,
        };
        debug!(
            content_length = ?info.content_length,
            filename = ?info.filename,
            "probe complete"
        );
        Ok(info)
    }

    /// Issues a streamed GET, with `Range: bytes=N-` when `range_start` is a
    /// positive offset.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for invalid URLs, transport failures, and
    /// non-success statuses.
    pub async fn get(
        &self,
        url: &str,
        range_start: Option<u64>,
    ) -> Result<Response, DownloadError> {
        let parsed = parse_url(url)?;
        let mut request = self.client.get(parsed);
        if let Some(offset) = range_start.filter(|offset| *offset > 0) {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        check_status(url, response)
    }

    /// Fetches a page body as text.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for invalid URLs, transport failures,
    /// non-success statuses, and undecodable bodies.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        let parsed = parse_url(url)?;
        let response = self
            .client
            .get(parsed)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        let response = check_status(url, response)?;
        response
            .text()
            .await
            .map_err(|e| DownloadError::network(url, e))
    }
}

fn base_client_builder(settings: &ClientSettings, jar: Arc<Jar>) -> ClientBuilder {
    Client::builder()
        .connect_timeout(settings.request_timeout)
        .read_timeout(settings.read_timeout)
        .gzip(true)
        .user_agent(settings.user_agent.clone())
        .cookie_provider(jar)
}

fn parse_url(url: &str) -> Result<Url, DownloadError> {
    Url::parse(url).map_err(|_| DownloadError::invalid_url(url))
}

fn check_status(url: &str, response: Response) -> Result<Response, DownloadError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(DownloadError::http_status(url, status.as_u16()))
    }
}

/// Reads `Content-Length` from the raw headers.
///
/// `Response::content_length` reflects the body size hint, which is zero for
/// HEAD responses, so the header is parsed directly.
pub(crate) fn header_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Filename from `Content-Disposition`, when present and parseable.
pub(crate) fn header_filename(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_disposition)
}

/// Parsed `Content-Range: bytes START-END/TOTAL` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub start: u64,
    pub total: Option<u64>,
}

pub(crate) fn header_content_range(headers: &HeaderMap) -> Option<ContentRange> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_range)
}

fn parse_content_range(value: &str) -> Option<ContentRange> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = spec.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    Some(ContentRange {
        start: start.trim().parse().ok()?,
        total: total.trim().parse().ok(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(&ClientSettings::default()).unwrap()
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 600-999/1000"),
            Some(ContentRange {
                start: 600,
                total: Some(1000)
            })
        );
        assert_eq!(
            parse_content_range("bytes 0-99/*"),
            Some(ContentRange {
                start: 0,
                total: None
            })
        );
        assert_eq!(parse_content_range("items 1-2/3"), None);
        assert_eq!(parse_content_range("bytes */1000"), None);
    }

    #[tokio::test]
    async fn test_probe_reads_length_and_filename() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .and(path("/file"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", r#"attachment; filename="notes.txt""#)
                    .set_body_bytes(vec![0u8; 42]),
            )
            .mount(&mock_server)
            .await;

        let info = client()
            .probe(&format!("{}/file", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(info.content_length, Some(42));
        assert_eq!(info.filename.as_deref(), Some("notes.txt"));
    }

    #[tokio::test]
    async fn test_probe_maps_error_status() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let error = client()
            .probe(&format!("{}/missing", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(error, DownloadError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_get_sends_range_header_when_resuming() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/file"))
            .and(header("Range", "bytes=600-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 400]))
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = client()
            .get(&format!("{}/file", mock_server.uri()), Some(600))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 206);
    }

    #[tokio::test]
    async fn test_get_invalid_url() {
        let error = client().get("not-a-valid-url", None).await.unwrap_err();
        assert!(matches!(error, DownloadError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_fetch_text_returns_body() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .mount(&mock_server)
            .await;

        let body = client()
            .fetch_text(&format!("{}/page", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html>hi</html>");
    }

    #[tokio::test]
    async fn test_session_carries_cookies_between_requests() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/set"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Set-Cookie", "warning=abc; Path=/"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/check"))
            .and(header("Cookie", "warning=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client();
        client
            .fetch_text(&format!("{}/set", mock_server.uri()))
            .await
            .unwrap();
        let clone = client.clone();
        let body = clone
            .fetch_text(&format!("{}/check", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }
}

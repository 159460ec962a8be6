//! Detection and negotiation of provider confirmation pages.
//!
//! Some providers answer a download request for a large file with an HTML
//! page asking the user to confirm, because the file is too big to be virus
//! scanned. The page links (or posts) to the real download URL.
//!
//! Detection looks at response headers only, before any body byte is
//! consumed. The default heuristic, [`HtmlWithoutDisposition`], can misfire
//! on a genuine HTML file served without `Content-Disposition`; callers that
//! know better can plug in their own [`InterstitialDetector`].

use std::fmt::Debug;
use std::sync::LazyLock;

use futures_util::StreamExt;
use regex::Regex;
use reqwest::Response;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap};
use tracing::{debug, info, instrument};
use url::Url;

use super::{DownloadError, HttpClient};
use crate::html::{attribute_value, compile_static_regex};

/// Decides from response headers whether a response is a confirmation page.
pub trait InterstitialDetector: Debug + Send + Sync {
    /// Returns true when the response should be negotiated instead of saved.
    fn is_interstitial(&self, headers: &HeaderMap) -> bool;
}

/// HTML content type and no `Content-Disposition` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlWithoutDisposition;

impl InterstitialDetector for HtmlWithoutDisposition {
    fn is_interstitial(&self, headers: &HeaderMap) -> bool {
        let is_html = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("text/html"));
        is_html && !headers.contains_key(CONTENT_DISPOSITION)
    }
}

static FORM_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)(<form\b[^>]*>)(.*?)</form>"));

static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<input\b[^>]*>"));

static CONFIRM_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<a\b[^>]*\bhref\s*=\s*["']([^"']*confirm=[^"']*)["']"#)
});

const FORM_IDS: [&str; 2] = ["downloadForm", "download-form"];

/// Extracts the confirmation target from a confirmation page.
///
/// Prefers the action of the download form; hidden inputs of a GET form are
/// appended as query parameters. Falls back to the first anchor whose target
/// carries a `confirm=` token. The result may be relative.
#[must_use]
pub fn find_confirmation_target(page: &str) -> Option<String> {
    for caps in FORM_RE.captures_iter(page) {
        let (Some(tag), Some(body)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let tag = tag.as_str();
        let is_download_form = attribute_value(tag, "id")
            .is_some_and(|id| FORM_IDS.iter().any(|known| known.eq_ignore_ascii_case(&id)));
        if !is_download_form {
            continue;
        }
        let Some(action) = attribute_value(tag, "action").filter(|a| !a.trim().is_empty()) else {
            continue;
        };

        let is_post =
            attribute_value(tag, "method").is_some_and(|m| m.eq_ignore_ascii_case("post"));
        if is_post {
            return Some(action);
        }
        return Some(append_hidden_inputs(&action, body.as_str()));
    }

    CONFIRM_ANCHOR_RE
        .captures(page)
        .and_then(|caps| caps.get(1))
        .map(|href| crate::html::decode_entities(href.as_str()))
}

fn append_hidden_inputs(action: &str, form_body: &str) -> String {
    let params: Vec<(String, String)> = INPUT_RE
        .find_iter(form_body)
        .filter_map(|input| {
            let input = input.as_str();
            let is_hidden =
                attribute_value(input, "type").is_some_and(|t| t.eq_ignore_ascii_case("hidden"));
            if !is_hidden {
                return None;
            }
            let name = attribute_value(input, "name")?;
            let value = attribute_value(input, "value").unwrap_or_default();
            Some((name, value))
        })
        .collect();

    if params.is_empty() {
        return action.to_string();
    }

    let query: Vec<String> = params
        .iter()
        .map(|(name, value)| {
            format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
        })
        .collect();
    let separator = if action.contains('?') { '&' } else { '?' };
    format!("{action}{separator}{}", query.join("&"))
}

/// Reads at most `limit` bytes of a response body as lossy UTF-8.
///
/// # Errors
///
/// Returns [`DownloadError::Network`] when the body stream fails.
pub async fn read_page(
    response: Response,
    url: &str,
    limit: usize,
) -> Result<String, DownloadError> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        let room = limit.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= limit {
            debug!(limit, "confirmation page truncated");
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Negotiates a confirmation page into the real file response.
///
/// The target is resolved against `confirm_base`, since confirmation
/// endpoints live on the provider's own host rather than the host that
/// served the page. The request goes through the shared session, so cookies
/// set alongside the page are sent back. `range_start` is forwarded
/// unchanged; the caller must check the status of the returned response.
///
/// # Errors
///
/// Every failure is a [`DownloadError::Confirmation`]: no target on the page,
/// an unresolvable target, a failed request, or another confirmation page.
#[instrument(skip(client, detector, page, original_link), fields(link = %original_link))]
pub async fn negotiate(
    client: &HttpClient,
    detector: &dyn InterstitialDetector,
    page: &str,
    original_link: &str,
    confirm_base: &Url,
    range_start: Option<u64>,
) -> Result<Response, DownloadError> {
    let target = find_confirmation_target(page).ok_or_else(|| {
        DownloadError::confirmation(original_link, "no confirmation form or link on page")
    })?;
    let confirm_url = confirm_base.join(&target).map_err(|e| {
        DownloadError::confirmation(
            original_link,
            format!("invalid confirmation target {target}: {e}"),
        )
    })?;

    info!(url = %confirm_url, "following confirmation page");

    let response = client
        .get(confirm_url.as_str(), range_start)
        .await
        .map_err(|e| {
            DownloadError::confirmation(original_link, format!("confirmed request failed: {e}"))
        })?;

    if detector.is_interstitial(response.headers()) {
        return Err(DownloadError::confirmation(
            original_link,
            "provider served another confirmation page",
        ));
    }
    Ok(response)
}

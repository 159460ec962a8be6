//! Minimal HTML scanning helpers shared by the confirmation-page parser and
//! the link scraper. Pages are scanned with regexes, not parsed into a DOM.

use std::sync::LazyLock;

use regex::Regex;

/// Compiles a regex literal. Panics only if the literal itself is malformed.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)\b([a-z][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
});

static ANCHOR_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<a\b[^>]*>"));

/// Returns the decoded value of attribute `name` in a single opening tag.
pub(crate) fn attribute_value(tag: &str, name: &str) -> Option<String> {
    ATTRIBUTE_RE.captures_iter(tag).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        let value = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4))?;
        Some(decode_entities(value.as_str()))
    })
}

/// `href` values of every anchor tag in `html`, in document order.
pub(crate) fn anchor_hrefs(html: &str) -> Vec<String> {
    ANCHOR_TAG_RE
        .find_iter(html)
        .filter_map(|tag| attribute_value(tag.as_str(), "href"))
        .collect()
}

/// Decodes the handful of entities that appear inside URLs in attribute values.
pub(crate) fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&#x3D;", "=")
        .replace("&#61;", "=")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

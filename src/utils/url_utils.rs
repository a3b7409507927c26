//! URL utilities.
//!
//! Destination keys scope the rate limiter; link resolution turns the
//! relative hrefs found on a listing into absolute detail URLs.

use url::Url;

/// Derive the rate limiting destination key for a URL.
///
/// The key is the lowercased host, with the port appended only when the
/// URL names one explicitly. Returns `None` for URLs without a host.
///
/// # Example
/// ```
/// # use template_scraper::utils::destination_key;
/// assert_eq!(destination_key("https://Example.com/a?b=1").as_deref(), Some("example.com"));
/// assert_eq!(destination_key("http://localhost:8080/x").as_deref(), Some("localhost:8080"));
/// assert_eq!(destination_key("not a url"), None);
/// ```
#[must_use]
pub fn destination_key(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    if host.is_empty() {
        return None;
    }
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// Resolve a possibly relative link against the page it was found on.
///
/// Returns `None` for empty links, fragments, and non-navigable schemes.
#[must_use]
pub fn resolve_link(base: &str, link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty()
        || link.starts_with('#')
        || link.starts_with("javascript:")
        || link.starts_with("mailto:")
        || link.starts_with("tel:")
        || link.starts_with("data:")
    {
        return None;
    }

    if let Ok(absolute) = Url::parse(link) {
        return is_valid_url(absolute.as_str()).then(|| absolute.to_string());
    }

    let base = Url::parse(base).ok()?;
    let joined = base.join(link).ok()?;
    is_valid_url(joined.as_str()).then(|| joined.to_string())
}

/// Check if a URL is a navigable http(s) URL
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

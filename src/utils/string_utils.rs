//! Text normalization helpers shared by the extractor and traversal.
//!
//! Values scraped from rendered pages carry layout whitespace (newlines,
//! non-breaking spaces, indentation). Everything compared or stored goes
//! through `normalize_whitespace` first.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\u{00A0}]+").expect("Invalid whitespace regex"));

/// Collapse every run of whitespace into a single space and trim both ends.
///
/// # Examples
/// ```
/// # use template_scraper::utils::string_utils::normalize_whitespace;
/// assert_eq!(normalize_whitespace("  Jane \n\t Doe "), "Jane Doe");
/// assert_eq!(normalize_whitespace("\u{00A0}"), "");
/// ```
#[must_use]
pub fn normalize_whitespace(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s, " ").trim().to_string()
}

/// Lowercased, whitespace-normalized form used for fuzzy comparisons
#[must_use]
pub fn comparable(s: &str) -> String {
    normalize_whitespace(s).to_lowercase()
}

/// Number of Unicode characters in `s`
#[inline]
#[must_use]
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

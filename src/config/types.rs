//! Core configuration types for extraction runs
//!
//! `ExtractConfig` holds everything about a run that is not part of a
//! template: concurrency, timeouts, retry policy, browser options and the
//! rate limits applied to detail destinations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::crawl_engine::rate_limiter::RateLimitConfig;

/// Main configuration struct for extraction runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Number of concurrent detail workers, each with its own page session.
    ///
    /// **INVARIANT:** Within `1..=MAX_DETAIL_CONCURRENCY` (checked in builder).
    pub(crate) detail_concurrency: usize,

    /// Longest a detail worker waits for rate limiter admission, in seconds.
    ///
    /// Exceeding it records a `RateLimited` error on the item.
    pub(crate) acquire_timeout_secs: u64,

    /// Timeout in seconds for page navigation (listing and detail pages)
    ///
    /// Default: 30 seconds
    pub(crate) navigation_timeout_secs: u64,

    /// Timeout in seconds for a single element action (find, read, click, scroll)
    ///
    /// Default: 10 seconds
    pub(crate) action_timeout_secs: u64,

    /// Attempts for the initial listing navigation, including the first one
    pub(crate) navigation_retries: u32,
    pub(crate) retry_initial_delay_ms: u64,
    pub(crate) retry_backoff_factor: f64,
    pub(crate) retry_max_delay_ms: u64,

    /// Extra passes over items whose detail fetch failed only with retryable
    /// errors. Default: 0
    pub(crate) detail_retry_passes: u32,

    pub(crate) headless: bool,

    /// Browser profile directory. A unique temporary one is used when unset.
    pub(crate) chrome_data_dir: Option<PathBuf>,

    /// Texts identifying a load-more control in `auto` mode, tried in order
    pub(crate) load_more_keywords: Vec<String>,

    /// Rate limit applied to every detail destination without an override.
    ///
    /// A template's `rate_limit_preset` takes precedence for that run.
    pub(crate) rate_limit: RateLimitConfig,

    /// Per-destination overrides keyed by host[:port]
    #[serde(default)]
    pub(crate) destination_rate_limits: HashMap<String, RateLimitConfig>,
}

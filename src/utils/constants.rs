//! Shared configuration constants for template_scraper
//!
//! This module contains default values and configuration constants used
//! throughout the codebase to ensure consistency and avoid magic numbers.

/// The only template document version the pipeline accepts.
///
/// Older documents must be migrated before they reach the pipeline.
pub const CURRENT_TEMPLATE_VERSION: &str = "2.1";

/// Default number of concurrent detail workers (one browser tab each)
pub const DEFAULT_DETAIL_CONCURRENCY: usize = 4;

/// Upper bound on detail workers.
///
/// Each worker holds its own page session, so this also bounds open tabs.
pub const MAX_DETAIL_CONCURRENCY: usize = 32;

/// Default budget for one rate limiter admission, in seconds
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Default timeout for `PageSource::navigate`, in seconds
pub const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a single element action (find, click, scroll), in seconds
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 10;

/// Navigation attempts for the listing page before the run gives up
pub const DEFAULT_NAVIGATION_RETRIES: u32 = 3;

/// First backoff delay between listing navigation attempts, in milliseconds
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1000;

/// Backoff growth factor between retry attempts
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Cap on a single backoff delay, in milliseconds
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;

/// Default pause after a load-more action, in milliseconds
pub const DEFAULT_PAUSE_MS: u64 = 2000;

/// Default number of consecutive no-growth actions before a listing stalls
pub const DEFAULT_CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Default multiplier applied to the pause for the single grace attempt
pub const DEFAULT_EXTENDED_WAIT_MULTIPLIER: f64 = 2.0;

/// Longest wait a load strategy may ask for, grace attempt included
pub const MAX_PAUSE_SECS: f64 = 3600.0;

/// Minimum normalized similarity for a label match in proximity search
pub const LABEL_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Pixel dead-zone used when deciding on which side of a label a value sits
pub const DIRECTION_TOLERANCE_PX: f64 = 10.0;

/// Texts at least this long are never treated as a proximity value
pub const MAX_PROXIMITY_VALUE_CHARS: usize = 200;

/// Clickable texts at least this long are never treated as load-more controls
pub const MAX_LOAD_MORE_TEXT_CHARS: usize = 40;

/// Locator used to discover candidate load-more controls in `auto` mode
pub const LOAD_MORE_CANDIDATE_LOCATOR: &str =
    "button, a, [role='button'], input[type='button'], input[type='submit']";

/// Keywords that identify a load-more control in `auto` mode, tried in order
pub const LOAD_MORE_KEYWORDS: &[&str] = &[
    "load more",
    "show more",
    "see more",
    "view more",
    "more results",
    "show all",
    "view all",
    "load all",
    "show additional",
    "more people",
    "view additional",
    "show more results",
    "load next",
    "show next",
    "next page",
    "older posts",
    "next",
    "expand",
    "more",
];

//! Builder setter methods
//!
//! Setters only record values; ranges are checked once in `build()`.

use std::path::PathBuf;

use super::builder::ExtractConfigBuilder;
use crate::crawl_engine::rate_limiter::RateLimitConfig;

impl ExtractConfigBuilder {
    /// Set the number of concurrent detail workers
    ///
    /// Each worker opens its own browser tab, so this also bounds open tabs.
    ///
    /// # Example
    /// ```rust
    /// # use template_scraper::config::ExtractConfig;
    /// # fn main() -> anyhow::Result<()> {
    /// let config = ExtractConfig::builder()
    ///     .detail_concurrency(8)
    ///     .build()?;
    /// assert_eq!(config.detail_concurrency(), 8);
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn detail_concurrency(mut self, workers: usize) -> Self {
        self.detail_concurrency = workers;
        self
    }

    #[must_use]
    pub fn acquire_timeout_secs(mut self, secs: u64) -> Self {
        self.acquire_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.navigation_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn action_timeout_secs(mut self, secs: u64) -> Self {
        self.action_timeout_secs = secs;
        self
    }

    /// Set how many times the listing navigation is attempted
    #[must_use]
    pub fn navigation_retries(mut self, attempts: u32) -> Self {
        self.navigation_retries = attempts;
        self
    }

    /// Configure exponential backoff between listing navigation attempts
    ///
    /// # Arguments
    /// * `initial_delay_ms` - Delay before the second attempt
    /// * `factor` - Growth per attempt, at least 1.0
    /// * `max_delay_ms` - Cap on a single delay
    #[must_use]
    pub fn retry_backoff(mut self, initial_delay_ms: u64, factor: f64, max_delay_ms: u64) -> Self {
        self.retry_initial_delay_ms = initial_delay_ms;
        self.retry_backoff_factor = factor;
        self.retry_max_delay_ms = max_delay_ms;
        self
    }

    /// Re-fetch detail pages whose only failures were retryable
    ///
    /// Set to 0 (the default) to keep the first outcome.
    #[must_use]
    pub fn detail_retry_passes(mut self, passes: u32) -> Self {
        self.detail_retry_passes = passes;
        self
    }

    /// Set browser headless mode
    ///
    /// Headed mode is only honored in debug builds; release builds force
    /// headless and log a warning.
    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn chrome_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chrome_data_dir = Some(dir.into());
        self
    }

    /// Replace the load-more keywords used in `auto` mode
    ///
    /// Keywords are matched case-insensitively, in the given order.
    #[must_use]
    pub fn load_more_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.load_more_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Default rate limit for every detail destination
    #[must_use]
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Dedicated rate limit for one destination (host or host:port)
    #[must_use]
    pub fn destination_rate_limit(
        mut self,
        destination: impl Into<String>,
        config: RateLimitConfig,
    ) -> Self {
        self.destination_rate_limits
            .insert(destination.into().to_lowercase(), config);
        self
    }
}

//! Getter methods for `ExtractConfig`

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::types::ExtractConfig;
use crate::crawl_engine::rate_limiter::RateLimitConfig;

impl ExtractConfig {
    #[must_use]
    pub fn detail_concurrency(&self) -> usize {
        self.detail_concurrency
    }

    #[must_use]
    pub fn acquire_timeout_secs(&self) -> u64 {
        self.acquire_timeout_secs
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    #[must_use]
    pub fn navigation_timeout_secs(&self) -> u64 {
        self.navigation_timeout_secs
    }

    #[must_use]
    pub fn action_timeout_secs(&self) -> u64 {
        self.action_timeout_secs
    }

    #[must_use]
    pub fn navigation_retries(&self) -> u32 {
        self.navigation_retries
    }

    #[must_use]
    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    #[must_use]
    pub fn retry_backoff_factor(&self) -> f64 {
        self.retry_backoff_factor
    }

    #[must_use]
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    #[must_use]
    pub fn detail_retry_passes(&self) -> u32 {
        self.detail_retry_passes
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn chrome_data_dir(&self) -> Option<&PathBuf> {
        self.chrome_data_dir.as_ref()
    }

    #[must_use]
    pub fn load_more_keywords(&self) -> &[String] {
        &self.load_more_keywords
    }

    #[must_use]
    pub fn rate_limit(&self) -> &RateLimitConfig {
        &self.rate_limit
    }

    #[must_use]
    pub fn destination_rate_limits(&self) -> &HashMap<String, RateLimitConfig> {
        &self.destination_rate_limits
    }
}

//! Builder for `ExtractConfig`
//!
//! Every field has a default, so `ExtractConfig::builder().build()` is a
//! valid configuration. `build` checks ranges and rejects anything the run
//! could not honor.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::crawl_engine::rate_limiter::RateLimitConfig;
use crate::utils::{
    DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_ACTION_TIMEOUT_SECS, DEFAULT_DETAIL_CONCURRENCY,
    DEFAULT_NAVIGATION_RETRIES, DEFAULT_NAVIGATION_TIMEOUT_SECS, DEFAULT_RETRY_BACKOFF_FACTOR,
    DEFAULT_RETRY_INITIAL_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS, LOAD_MORE_KEYWORDS,
    MAX_DETAIL_CONCURRENCY,
};

use super::types::ExtractConfig;

pub struct ExtractConfigBuilder {
    pub(crate) detail_concurrency: usize,
    pub(crate) acquire_timeout_secs: u64,
    pub(crate) navigation_timeout_secs: u64,
    pub(crate) action_timeout_secs: u64,
    pub(crate) navigation_retries: u32,
    pub(crate) retry_initial_delay_ms: u64,
    pub(crate) retry_backoff_factor: f64,
    pub(crate) retry_max_delay_ms: u64,
    pub(crate) detail_retry_passes: u32,
    pub(crate) headless: bool,
    pub(crate) chrome_data_dir: Option<PathBuf>,
    pub(crate) load_more_keywords: Vec<String>,
    pub(crate) rate_limit: RateLimitConfig,
    pub(crate) destination_rate_limits: HashMap<String, RateLimitConfig>,
}

impl Default for ExtractConfigBuilder {
    fn default() -> Self {
        Self {
            detail_concurrency: DEFAULT_DETAIL_CONCURRENCY,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            navigation_timeout_secs: DEFAULT_NAVIGATION_TIMEOUT_SECS,
            action_timeout_secs: DEFAULT_ACTION_TIMEOUT_SECS,
            navigation_retries: DEFAULT_NAVIGATION_RETRIES,
            retry_initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            retry_backoff_factor: DEFAULT_RETRY_BACKOFF_FACTOR,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            detail_retry_passes: 0,
            headless: true,
            chrome_data_dir: None,
            load_more_keywords: LOAD_MORE_KEYWORDS.iter().map(|k| (*k).to_string()).collect(),
            rate_limit: RateLimitConfig::default(),
            destination_rate_limits: HashMap::new(),
        }
    }
}

impl ExtractConfig {
    /// Create a builder for configuring an `ExtractConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder::default()
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        let b = ExtractConfigBuilder::default();
        Self {
            detail_concurrency: b.detail_concurrency,
            acquire_timeout_secs: b.acquire_timeout_secs,
            navigation_timeout_secs: b.navigation_timeout_secs,
            action_timeout_secs: b.action_timeout_secs,
            navigation_retries: b.navigation_retries,
            retry_initial_delay_ms: b.retry_initial_delay_ms,
            retry_backoff_factor: b.retry_backoff_factor,
            retry_max_delay_ms: b.retry_max_delay_ms,
            detail_retry_passes: b.detail_retry_passes,
            headless: b.headless,
            chrome_data_dir: b.chrome_data_dir,
            load_more_keywords: b.load_more_keywords,
            rate_limit: b.rate_limit,
            destination_rate_limits: b.destination_rate_limits,
        }
    }
}

impl ExtractConfigBuilder {
    pub fn build(self) -> Result<ExtractConfig> {
        if !(1..=MAX_DETAIL_CONCURRENCY).contains(&self.detail_concurrency) {
            bail!(
                "detail_concurrency must be between 1 and {MAX_DETAIL_CONCURRENCY}, got {}",
                self.detail_concurrency
            );
        }
        if self.acquire_timeout_secs == 0
            || self.navigation_timeout_secs == 0
            || self.action_timeout_secs == 0
        {
            bail!("timeouts must be positive");
        }
        if self.navigation_retries == 0 {
            bail!("navigation_retries must be at least 1");
        }
        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor < 1.0 {
            bail!(
                "retry_backoff_factor must be >= 1.0, got {}",
                self.retry_backoff_factor
            );
        }
        if self.retry_max_delay_ms < self.retry_initial_delay_ms {
            bail!("retry_max_delay_ms must not be below retry_initial_delay_ms");
        }

        let load_more_keywords: Vec<String> = self
            .load_more_keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if load_more_keywords.is_empty() {
            bail!("load_more_keywords must contain at least one keyword");
        }

        self.rate_limit
            .validate()
            .context("invalid default rate limit")?;
        for (destination, config) in &self.destination_rate_limits {
            config
                .validate()
                .with_context(|| format!("invalid rate limit for {destination}"))?;
        }

        // Enforce headless mode in release builds
        #[cfg(not(debug_assertions))]
        let headless = if !self.headless {
            tracing::warn!(
                "Forcing headless mode in release build. \
                Headed mode is only available in debug builds for development."
            );
            true
        } else {
            self.headless
        };

        #[cfg(debug_assertions)]
        let headless = self.headless;

        Ok(ExtractConfig {
            detail_concurrency: self.detail_concurrency,
            acquire_timeout_secs: self.acquire_timeout_secs,
            navigation_timeout_secs: self.navigation_timeout_secs,
            action_timeout_secs: self.action_timeout_secs,
            navigation_retries: self.navigation_retries,
            retry_initial_delay_ms: self.retry_initial_delay_ms,
            retry_backoff_factor: self.retry_backoff_factor,
            retry_max_delay_ms: self.retry_max_delay_ms,
            detail_retry_passes: self.detail_retry_passes,
            headless,
            chrome_data_dir: self.chrome_data_dir,
            load_more_keywords,
            rate_limit: self.rate_limit,
            destination_rate_limits: self.destination_rate_limits,
        })
    }
}

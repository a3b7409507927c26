//! Exponential backoff for transient failures
//!
//! Used for the listing navigation, where one flaky load would otherwise
//! lose the whole run. Errors are classified with [`FailureKind::classify`];
//! permanent ones fail fast.

use anyhow::Result;
use log::warn;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::crawl_types::{ExtractError, FailureKind};
use crate::config::ExtractConfig;

/// Attempt budget and delay curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &ExtractConfig) -> Self {
        Self {
            max_attempts: config.navigation_retries(),
            initial_delay: config.retry_initial_delay(),
            backoff_factor: config.retry_backoff_factor(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// Single attempt, no waiting
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1
    #[must_use]
    pub fn delay_for(&self, attempt: u32, kind: FailureKind) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let secs = self.initial_delay.as_secs_f64()
            * self.backoff_factor.powi(exponent)
            * kind.delay_multiplier();
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}

/// Run `operation` until it succeeds, fails permanently or the attempts run out
///
/// # Arguments
/// * `policy` - Attempt budget and delays
/// * `cancel` - Cancels the wait between attempts
/// * `operation_name` - Used in log messages
/// * `operation` - Called with the 1-based attempt number
///
/// # Returns
/// The first success, or the last error. Cancellation during a backoff wait
/// returns `ExtractError::Cancelled`.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let kind = FailureKind::classify(&error);
        if !kind.is_retryable() {
            warn!("{operation_name}: non-retryable {kind} error, failing fast: {error:#}");
            return Err(error);
        }
        if attempt >= max_attempts {
            warn!("{operation_name}: giving up after {attempt} attempts: {error:#}");
            return Err(error);
        }

        let delay = policy.delay_for(attempt, kind);
        warn!(
            "{operation_name}: {kind} error on attempt {attempt}/{max_attempts}, retrying in {}ms: {error:#}",
            delay.as_millis()
        );
        tokio::select! {
            () = cancel.cancelled() => return Err(ExtractError::Cancelled.into()),
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

//! Per-destination rate limiter for detail page fetches
//!
//! Each destination (host[:port] of a detail URL) gets its own [`RateBudget`]:
//! a continuously refilled token bucket for short-term smoothing, plus
//! optional sliding windows that cap requests per minute and per hour.
//!
//! Key features:
//! - Budgets are created lazily and live in a `DashMap`
//! - Every budget has its own lock, so destinations never contend
//! - Pure admission math (`RateBudget::try_admit`) shared by the async and
//!   blocking waiters
//! - Waits are cancellable and bounded by a caller-supplied timeout
//! - Named presets and per-destination overrides

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Refill arithmetic tolerance so float rounding never costs a whole token
const TOKEN_EPSILON: f64 = 1e-9;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Longest single sleep of the blocking waiter between cancellation checks
const BLOCKING_SLICE: Duration = Duration::from_millis(100);

/// Rate limit decision for a single admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request is allowed to proceed
    Allow,
    /// Request must wait at least `retry_after` before trying again
    Deny { retry_after: Duration },
}

/// Result of a waiting acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    /// The wait needed would exceed the caller's timeout
    TimedOut,
    Cancelled,
}

impl AcquireOutcome {
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Budget parameters for one destination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_hour: Option<u32>,
    pub burst_size: u32,
}

/// Names accepted by [`RateLimitConfig::preset`]
pub const PRESET_NAMES: &[&str] = &["conservative", "moderate", "aggressive", "respectful_bot"];

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::moderate()
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            requests_per_minute: None,
            requests_per_hour: None,
            burst_size,
        }
    }

    #[must_use]
    pub fn per_minute(mut self, limit: u32) -> Self {
        self.requests_per_minute = Some(limit);
        self
    }

    #[must_use]
    pub fn per_hour(mut self, limit: u32) -> Self {
        self.requests_per_hour = Some(limit);
        self
    }

    #[must_use]
    pub fn conservative() -> Self {
        Self::new(0.5, 2).per_minute(20)
    }

    #[must_use]
    pub fn moderate() -> Self {
        Self::new(1.0, 5).per_minute(50)
    }

    #[must_use]
    pub fn aggressive() -> Self {
        Self::new(5.0, 10).per_minute(200)
    }

    #[must_use]
    pub fn respectful_bot() -> Self {
        Self::new(0.2, 1).per_minute(10).per_hour(500)
    }

    /// Resolve a preset by name (case-insensitive; `respectful` is accepted
    /// for `respectful_bot`)
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "conservative" => Some(Self::conservative()),
            "moderate" => Some(Self::moderate()),
            "aggressive" => Some(Self::aggressive()),
            "respectful_bot" | "respectful" => Some(Self::respectful_bot()),
            _ => None,
        }
    }

    /// Check the parameters describe a budget that can ever admit a request
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            anyhow::bail!(
                "requests_per_second must be positive, got {}",
                self.requests_per_second
            );
        }
        if self.burst_size == 0 {
            anyhow::bail!("burst_size must be at least 1");
        }
        if self.requests_per_minute == Some(0) || self.requests_per_hour == Some(0) {
            anyhow::bail!("window ceilings must be at least 1 when set");
        }
        Ok(())
    }
}

/// Counters for one destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStats {
    /// Admitted requests
    pub total_requests: u64,
    /// Acquisitions that had to wait or were refused
    pub rate_limited: u64,
    /// Mean time admitted requests spent waiting, in seconds
    pub average_delay_secs: f64,
}

/// Snapshot of a destination's budget
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurrentRates {
    pub tokens_available: f64,
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
}

/// Admission state for one destination.
///
/// Invariant: `tokens` stays within `[0, burst_size]`.
#[derive(Debug)]
pub struct RateBudget {
    config: RateLimitConfig,
    tokens: f64,
    last_refill: Instant,
    minute_window: VecDeque<Instant>,
    hour_window: VecDeque<Instant>,
    total_requests: u64,
    rate_limited: u64,
    total_delay: Duration,
}

impl RateBudget {
    /// A full bucket as of `now`
    #[must_use]
    pub fn new(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            config,
            tokens: f64::from(config.burst_size),
            last_refill: now,
            minute_window: VecDeque::new(),
            hour_window: VecDeque::new(),
            total_requests: 0,
            rate_limited: 0,
            total_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.requests_per_second)
            .min(f64::from(self.config.burst_size));
        self.last_refill = now;
    }

    fn purge(&mut self, now: Instant) {
        while self
            .minute_window
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= MINUTE)
        {
            self.minute_window.pop_front();
        }
        while self
            .hour_window
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= HOUR)
        {
            self.hour_window.pop_front();
        }
    }

    /// Time until the window admits again, if it is full.
    ///
    /// The entry that has to expire is the one that would leave exactly
    /// `ceiling - 1` requests behind it.
    fn window_wait(
        window: &VecDeque<Instant>,
        ceiling: Option<u32>,
        span: Duration,
        now: Instant,
    ) -> Duration {
        let Some(ceiling) = ceiling else {
            return Duration::ZERO;
        };
        let ceiling = ceiling as usize;
        if window.len() < ceiling {
            return Duration::ZERO;
        }
        window
            .get(window.len() - ceiling)
            .map(|t| span.saturating_sub(now.saturating_duration_since(*t)))
            .unwrap_or(Duration::ZERO)
    }

    /// One admission attempt at `now`.
    ///
    /// On `Allow` one token is consumed and the request is recorded in both
    /// windows. On `Deny` nothing changes except the refill bookkeeping.
    pub fn try_admit(&mut self, now: Instant) -> RateLimitDecision {
        self.refill(now);
        self.purge(now);

        let token_wait = if self.tokens + TOKEN_EPSILON >= 1.0 {
            Duration::ZERO
        } else {
            seconds_ceil((1.0 - self.tokens) / self.config.requests_per_second)
        };
        let minute_wait = Self::window_wait(
            &self.minute_window,
            self.config.requests_per_minute,
            MINUTE,
            now,
        );
        let hour_wait =
            Self::window_wait(&self.hour_window, self.config.requests_per_hour, HOUR, now);

        let retry_after = token_wait.max(minute_wait).max(hour_wait);
        if !retry_after.is_zero() {
            return RateLimitDecision::Deny { retry_after };
        }

        self.tokens = (self.tokens - 1.0).max(0.0);
        if self.config.requests_per_minute.is_some() {
            self.minute_window.push_back(now);
        }
        if self.config.requests_per_hour.is_some() {
            self.hour_window.push_back(now);
        }
        RateLimitDecision::Allow
    }

    fn record(&mut self, waited: Duration, admitted: bool) {
        if admitted {
            self.total_requests += 1;
            self.total_delay += waited;
        }
        if !waited.is_zero() || !admitted {
            self.rate_limited += 1;
        }
    }

    #[must_use]
    pub fn stats(&self) -> RateLimitStats {
        let average_delay_secs = if self.total_requests == 0 {
            0.0
        } else {
            self.total_delay.as_secs_f64() / self.total_requests as f64
        };
        RateLimitStats {
            total_requests: self.total_requests,
            rate_limited: self.rate_limited,
            average_delay_secs,
        }
    }

    fn current_rates(&mut self, now: Instant) -> CurrentRates {
        self.refill(now);
        self.purge(now);
        CurrentRates {
            tokens_available: self.tokens,
            requests_last_minute: self.minute_window.len(),
            requests_last_hour: self.hour_window.len(),
        }
    }
}

/// Round up to whole nanoseconds so a computed wait is never a hair short
fn seconds_ceil(secs: f64) -> Duration {
    Duration::from_nanos((secs.max(0.0) * 1e9).ceil() as u64)
}

/// Admission control shared by all detail workers
#[derive(Debug)]
pub struct RateLimiter {
    default_config: RateLimitConfig,
    overrides: DashMap<String, RateLimitConfig>,
    budgets: DashMap<String, Arc<Mutex<RateBudget>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            default_config,
            overrides: DashMap::new(),
            budgets: DashMap::new(),
        }
    }

    #[must_use]
    pub fn default_config(&self) -> &RateLimitConfig {
        &self.default_config
    }

    fn config_for(&self, destination: &str) -> RateLimitConfig {
        self.overrides
            .get(destination)
            .map_or(self.default_config, |c| *c)
    }

    fn budget(&self, destination: &str) -> Arc<Mutex<RateBudget>> {
        if let Some(budget) = self.budgets.get(destination) {
            return Arc::clone(&budget);
        }
        let config = self.config_for(destination);
        self.budgets
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateBudget::new(config, Instant::now()))))
            .clone()
    }

    /// Use a dedicated configuration for one destination.
    ///
    /// Any existing budget for it is discarded and starts over full.
    pub fn set_destination_config(&self, destination: &str, config: RateLimitConfig) {
        self.overrides.insert(destination.to_string(), config);
        self.budgets.remove(destination);
    }

    /// Single admission attempt without waiting
    pub fn try_acquire(&self, destination: &str) -> RateLimitDecision {
        let budget = self.budget(destination);
        let mut budget = budget.lock();
        let decision = budget.try_admit(Instant::now());
        budget.record(Duration::ZERO, decision == RateLimitDecision::Allow);
        decision
    }

    /// Wait until `destination` admits a request.
    ///
    /// Returns `TimedOut` as soon as the required wait would exceed `timeout`
    /// (`None` waits as long as needed), and `Cancelled` when `cancel` fires
    /// while waiting.
    pub async fn acquire(
        &self,
        destination: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> AcquireOutcome {
        let budget = self.budget(destination);
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return AcquireOutcome::Cancelled;
            }

            let now = Instant::now();
            let waited = now.saturating_duration_since(started);
            let retry_after = {
                let mut guard = budget.lock();
                match guard.try_admit(now) {
                    RateLimitDecision::Allow => {
                        guard.record(waited, true);
                        return AcquireOutcome::Granted;
                    }
                    RateLimitDecision::Deny { retry_after } => {
                        if timeout.is_some_and(|t| waited + retry_after > t) {
                            guard.record(waited, false);
                            log::debug!(
                                "Rate limit for {destination} needs {retry_after:?} more, over budget {timeout:?}"
                            );
                            return AcquireOutcome::TimedOut;
                        }
                        retry_after
                    }
                }
            };

            tokio::select! {
                () = cancel.cancelled() => return AcquireOutcome::Cancelled,
                () = tokio::time::sleep(retry_after) => {}
            }
        }
    }

    /// Blocking variant of [`RateLimiter::acquire`] for callers on plain threads.
    ///
    /// Sleeps in short slices so cancellation is noticed promptly.
    pub fn acquire_blocking(
        &self,
        destination: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> AcquireOutcome {
        let budget = self.budget(destination);
        let started = std::time::Instant::now();

        loop {
            if cancel.is_cancelled() {
                return AcquireOutcome::Cancelled;
            }

            let waited = started.elapsed();
            let retry_after = {
                let mut guard = budget.lock();
                match guard.try_admit(Instant::now()) {
                    RateLimitDecision::Allow => {
                        guard.record(waited, true);
                        return AcquireOutcome::Granted;
                    }
                    RateLimitDecision::Deny { retry_after } => {
                        if timeout.is_some_and(|t| waited + retry_after > t) {
                            guard.record(waited, false);
                            return AcquireOutcome::TimedOut;
                        }
                        retry_after
                    }
                }
            };

            std::thread::sleep(retry_after.min(BLOCKING_SLICE));
        }
    }

    /// Counters per destination
    #[must_use]
    pub fn stats(&self) -> BTreeMap<String, RateLimitStats> {
        self.budgets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().stats()))
            .collect()
    }

    /// Current budget for a destination, `None` if it was never used
    #[must_use]
    pub fn current_rates(&self, destination: &str) -> Option<CurrentRates> {
        let budget = self.budgets.get(destination).map(|b| Arc::clone(&b))?;
        let rates = budget.lock().current_rates(Instant::now());
        Some(rates)
    }

    #[must_use]
    pub fn tracked_destinations(&self) -> usize {
        self.budgets.len()
    }

    /// Forget every budget; overrides are kept
    pub fn reset(&self) {
        self.budgets.clear();
    }
}

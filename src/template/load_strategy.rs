//! How a listing is made to reveal more items

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::constants::{
    DEFAULT_CONSECUTIVE_FAILURE_LIMIT, DEFAULT_EXTENDED_WAIT_MULTIPLIER, DEFAULT_PAUSE_MS,
    MAX_PAUSE_SECS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadKind {
    /// Look for a load-more control by keyword, scroll when there is none
    #[default]
    Auto,
    /// Click `action_locator` until it disappears or stops producing items
    Button,
    /// Scroll to the bottom until the page stops growing
    Scroll,
    /// Click a next-page control; each page replaces the previous listing
    Pagination,
    /// Extract what is on the page once
    None,
}

impl LoadKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Button => "button",
            Self::Scroll => "scroll",
            Self::Pagination => "pagination",
            Self::None => "none",
        }
    }

    #[must_use]
    pub fn needs_locator(self) -> bool {
        matches!(self, Self::Button | Self::Pagination)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadStrategyConfig {
    pub kind: LoadKind,
    /// Wait after each action, in seconds
    pub pause_secs: f64,
    pub consecutive_failure_limit: u32,
    pub extended_wait_multiplier: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_locator: Option<String>,
}

impl Default for LoadStrategyConfig {
    fn default() -> Self {
        Self {
            kind: LoadKind::Auto,
            pause_secs: DEFAULT_PAUSE_MS as f64 / 1000.0,
            consecutive_failure_limit: DEFAULT_CONSECUTIVE_FAILURE_LIMIT,
            extended_wait_multiplier: DEFAULT_EXTENDED_WAIT_MULTIPLIER,
            action_locator: None,
        }
    }
}

impl LoadStrategyConfig {
    #[must_use]
    pub fn new(kind: LoadKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_action_locator(mut self, locator: impl Into<String>) -> Self {
        self.action_locator = Some(locator.into());
        self
    }

    #[must_use]
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause_secs = pause.as_secs_f64();
        self
    }

    #[must_use]
    pub fn with_failure_limit(mut self, limit: u32) -> Self {
        self.consecutive_failure_limit = limit;
        self
    }

    #[must_use]
    pub fn pause(&self) -> Duration {
        clamped_secs(self.pause_secs)
    }

    /// Pause used for the single grace attempt after a stall
    #[must_use]
    pub fn extended_pause(&self) -> Duration {
        clamped_secs(self.pause_secs * self.extended_wait_multiplier)
    }

    pub(crate) fn defect(&self) -> Option<String> {
        if !self.pause_secs.is_finite() || self.pause_secs < 0.0 {
            return Some(format!("pause_secs must be >= 0, got {}", self.pause_secs));
        }
        if self.consecutive_failure_limit == 0 {
            return Some("consecutive_failure_limit must be at least 1".to_string());
        }
        if !self.extended_wait_multiplier.is_finite() || self.extended_wait_multiplier < 1.0 {
            return Some(format!(
                "extended_wait_multiplier must be >= 1.0, got {}",
                self.extended_wait_multiplier
            ));
        }
        let extended = self.pause_secs * self.extended_wait_multiplier;
        if extended > MAX_PAUSE_SECS {
            return Some(format!(
                "pause_secs x extended_wait_multiplier must not exceed {MAX_PAUSE_SECS}s, got {extended}"
            ));
        }
        let locator_missing = self
            .action_locator
            .as_deref()
            .is_none_or(|l| l.trim().is_empty());
        if self.kind.needs_locator() && locator_missing {
            return Some(format!(
                "{} loading requires an action_locator",
                self.kind.as_str()
            ));
        }
        None
    }
}

/// Seconds to a `Duration`, limited to `0..=MAX_PAUSE_SECS`; NaN becomes zero
fn clamped_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_PAUSE_SECS)).unwrap_or(Duration::ZERO)
}

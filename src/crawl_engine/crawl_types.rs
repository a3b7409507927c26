//! Core types for extraction runs.
//!
//! Items, per-item and per-run errors, the failure classification used for
//! retry decisions, and the final [`ScrapeResult`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::crawl_engine::rate_limiter::RateLimitStats;
use crate::page_source::PageError;
use crate::template::TemplateError;

/// Categorizes failures for retry decisions
///
/// - Navigation, timeouts and lost sessions are usually transient
/// - Rate limiting recovers once the budget refills, with a longer backoff
/// - Locator and configuration problems are permanent for a given template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Page could not be loaded
    Navigation,
    /// Element lookup, read or script failed
    Locator,
    /// Rate limiter did not admit the request in time
    RateLimited,
    Timeout,
    Cancelled,
    /// Template or configuration is invalid
    Configuration,
    /// A page session could not be opened or was lost
    Session,
    Unknown,
}

impl FailureKind {
    /// Classify an error into a failure kind.
    ///
    /// Typed errors are inspected first; anything else falls back to
    /// message patterns.
    #[must_use]
    pub fn classify(error: &anyhow::Error) -> Self {
        if let Some(e) = error.downcast_ref::<ExtractError>() {
            return e.kind();
        }
        if let Some(e) = error.downcast_ref::<PageError>() {
            return Self::from(e);
        }
        if error.downcast_ref::<TemplateError>().is_some() {
            return Self::Configuration;
        }

        let msg = error.to_string().to_lowercase();

        if msg.contains("429") || msg.contains("too many requests") || msg.contains("rate limit")
        {
            return Self::RateLimited;
        }
        if msg.contains("timeout") || msg.contains("timed out") {
            return Self::Timeout;
        }
        if msg.contains("cancel") {
            return Self::Cancelled;
        }
        if msg.contains("navigat")
            || msg.contains("connection refused")
            || msg.contains("connection reset")
            || msg.contains("dns")
            || msg.contains("unreachable")
        {
            return Self::Navigation;
        }
        if msg.contains("session") || msg.contains("browser") || msg.contains("target closed") {
            return Self::Session;
        }
        if msg.contains("locator") || msg.contains("selector") || msg.contains("stale") {
            return Self::Locator;
        }

        Self::Unknown
    }

    /// Whether a later attempt may succeed without changing the template
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Navigation | Self::RateLimited | Self::Timeout | Self::Session => true,
            Self::Locator | Self::Cancelled | Self::Configuration | Self::Unknown => false,
        }
    }

    /// Base delay multiplier for this failure kind
    #[must_use]
    pub const fn delay_multiplier(&self) -> f64 {
        match self {
            Self::RateLimited => 3.0,
            Self::Session => 1.5,
            _ => 1.0,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Locator => "locator",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Configuration => "configuration",
            Self::Session => "session",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&PageError> for FailureKind {
    fn from(error: &PageError) -> Self {
        match error {
            PageError::Navigation { .. } => Self::Navigation,
            PageError::InvalidLocator { .. }
            | PageError::StaleHandle(_)
            | PageError::Script(_) => Self::Locator,
            PageError::Timeout { .. } => Self::Timeout,
            PageError::SessionClosed => Self::Session,
            PageError::Backend(_) => Self::Unknown,
        }
    }
}

/// Failures raised while producing or enriching one item
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Page(#[from] PageError),

    #[error("field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: PageError,
    },

    #[error("no rate limit budget for {destination} within {timeout_secs}s")]
    RateLimited {
        destination: String,
        timeout_secs: u64,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("detail link '{link}' cannot be resolved against {base}")]
    InvalidLink { link: String, base: String },

    #[error("could not open page session: {0}")]
    Session(PageError),

    #[error("processing panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl ExtractError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Page(e) | Self::Field { source: e, .. } => FailureKind::from(e),
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Cancelled => FailureKind::Cancelled,
            Self::InvalidLink { .. } => FailureKind::Locator,
            Self::Session(_) => FailureKind::Session,
            Self::Panicked(_) => FailureKind::Unknown,
            Self::Template(_) => FailureKind::Configuration,
        }
    }
}

/// A failure recorded on one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: FailureKind,
    pub message: String,
    /// Stage that produced the error, listing unless marked otherwise
    #[serde(default)]
    pub phase: RunPhase,
}

impl ItemError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            phase: RunPhase::Listing,
        }
    }

    #[must_use]
    pub fn in_phase(mut self, phase: RunPhase) -> Self {
        self.phase = phase;
        self
    }

    #[must_use]
    pub fn is_detail(&self) -> bool {
        self.phase == RunPhase::Detail
    }
}

impl From<&ExtractError> for ItemError {
    fn from(error: &ExtractError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl From<ExtractError> for ItemError {
    fn from(error: ExtractError) -> Self {
        Self::from(&error)
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// One repeating element of a listing, optionally enriched from its detail page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedItem {
    /// Listing URL the item was found on
    pub source_url: String,
    /// Position in discovery order across the whole listing
    pub sequence_index: usize,
    /// List fields in rule order
    pub fields: IndexMap<String, String>,
    /// Absolute detail page URL, when the list rules name a link field
    pub detail_url: Option<String>,
    pub detail_fields: Option<IndexMap<String, String>>,
    pub errors: Vec<ItemError>,
    pub scraped_at: DateTime<Utc>,
}

impl ScrapedItem {
    pub fn new(source_url: impl Into<String>, sequence_index: usize) -> Self {
        Self {
            source_url: source_url.into(),
            sequence_index,
            fields: IndexMap::new(),
            detail_url: None,
            detail_fields: None,
            errors: Vec::new(),
            scraped_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether fetching the detail page again may clear its failures.
    ///
    /// Listing errors are ignored here; a detail retry never touches them.
    #[must_use]
    pub fn needs_detail_retry(&self) -> bool {
        let mut detail_errors = self.errors.iter().filter(|e| e.is_detail()).peekable();
        self.detail_url.is_some()
            && detail_errors.peek().is_some()
            && detail_errors.all(|e| e.kind.is_retryable())
    }

    /// Drop detail errors and fields ahead of another detail attempt
    pub fn reset_detail(&mut self) {
        self.errors.retain(|e| !e.is_detail());
        self.detail_fields = None;
    }

    pub fn push_error(&mut self, error: impl Into<ItemError>) {
        self.errors.push(error.into());
    }

    /// Look up a field, list fields first, then detail fields
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .or_else(|| self.detail_fields.as_ref().and_then(|d| d.get(name)))
            .map(String::as_str)
    }
}

/// Stage of a run an error belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Configuration,
    #[default]
    Listing,
    Detail,
}

/// A failure that affected the whole run rather than one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub phase: RunPhase,
    pub kind: FailureKind,
    pub message: String,
}

impl RunError {
    pub fn new(phase: RunPhase, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            phase,
            kind,
            message: message.into(),
        }
    }
}

/// Everything one extraction run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub run_id: Uuid,
    pub template_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Ordered by `sequence_index`
    pub items: Vec<ScrapedItem>,
    pub run_errors: Vec<RunError>,
    pub successful_count: usize,
    pub failed_count: usize,
    /// Limiter counters keyed by destination
    pub rate_limit_stats: BTreeMap<String, RateLimitStats>,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
}

impl ScrapeResult {
    /// Empty result for a run that is starting now
    pub fn begin(template_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            template_name: template_name.into(),
            started_at: now,
            finished_at: now,
            items: Vec::new(),
            run_errors: Vec::new(),
            successful_count: 0,
            failed_count: 0,
            rate_limit_stats: BTreeMap::new(),
            metadata: IndexMap::new(),
        }
    }

    /// Sort items, derive the counts and stamp the finish time
    pub fn finish(&mut self) {
        self.items.sort_by_key(|item| item.sequence_index);
        self.successful_count = self.items.iter().filter(|i| i.is_successful()).count();
        self.failed_count = self.items.len() - self.successful_count;
        self.finished_at = Utc::now();
    }

    #[must_use]
    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    /// Share of items without errors, as a percentage
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.successful_count as f64 / self.items.len() as f64 * 100.0
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.run_errors
            .iter()
            .any(|e| e.kind == FailureKind::Cancelled)
    }
}

//! Extraction Engine Module
//!
//! This module contains the run-time side of template extraction: listing
//! traversal, rate limiting, concurrent detail fetching and the pipeline
//! that ties them into one run.

// Sub-modules
pub mod crawl_types;
pub mod detail_fetch;
pub mod page_timeout;
pub mod pipeline;
pub mod progress;
pub mod rate_limiter;
pub mod retry;
pub mod traversal;

// Re-exports for public API
pub use pipeline::ExtractionPipeline;

// Re-export progress types
pub use progress::{NoOpProgress, ProgressReporter};

// Re-export rate limiter types
pub use rate_limiter::{
    AcquireOutcome, CurrentRates, RateBudget, RateLimitConfig, RateLimitDecision, RateLimitStats,
    RateLimiter,
};

// Re-export run types
pub use crawl_types::{
    ExtractError, FailureKind, ItemError, RunError, RunPhase, ScrapeResult, ScrapedItem,
};

pub use detail_fetch::DetailFetcher;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use traversal::{ListTraversal, TraversalEnd, TraversalOutcome, TraversalPhase, TraversalState};

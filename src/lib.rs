//! Template-driven structured data extraction from rendered web pages.
//!
//! A [`Template`] describes a listing page, how its repeating items and
//! their fields are located, how more items are revealed, and which fields
//! to pull from each item's detail page. [`ExtractionPipeline`] runs a
//! template against page sessions from any [`PageSourceFactory`] and returns
//! a [`ScrapeResult`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use template_scraper::{ChromiumPageSourceFactory, ExtractConfig, ExtractionPipeline, Template};
//! # async fn run(template: Template) -> anyhow::Result<()> {
//! let config = ExtractConfig::builder().detail_concurrency(4).build()?;
//! let factory = Arc::new(ChromiumPageSourceFactory::launch(&config).await?);
//! let pipeline = ExtractionPipeline::new(Arc::clone(&factory), config);
//! let result = pipeline
//!     .run(&template, tokio_util::sync::CancellationToken::new())
//!     .await;
//! println!("{} items, {:.1}% complete", result.total_items(), result.success_rate());
//! # Ok(())
//! # }
//! ```

pub mod browser_setup;
pub mod config;
pub mod crawl_engine;
pub mod extractor;
pub mod page_source;
pub mod template;
pub mod utils;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

pub use browser_setup::{download_managed_browser, find_browser_executable, launch_browser};
pub use config::{ExtractConfig, ExtractConfigBuilder};
pub use crawl_engine::{
    ExtractionPipeline, FailureKind, ItemError, NoOpProgress, ProgressReporter, RateLimitConfig,
    RateLimiter, RunError, RunPhase, ScrapeResult, ScrapedItem,
};
pub use extractor::{Direction, FieldResolver, PatternKind, Scope};
pub use page_source::{
    BoundingBox, ChromiumPageSource, ChromiumPageSourceFactory, ElementHandle, PageError,
    PageSource, PageSourceFactory,
};
pub use template::{
    ExtractionRule, LoadKind, LoadStrategyConfig, PageRole, RuleSet, Strategy, Template,
    TemplateError,
};

/// Launch Chromium, run one template and shut the browser down again
pub async fn scrape(
    template: &Template,
    config: ExtractConfig,
    cancel: CancellationToken,
) -> anyhow::Result<ScrapeResult> {
    let factory = Arc::new(
        ChromiumPageSourceFactory::launch(&config)
            .await
            .context("Failed to start browser backend")?,
    );

    let result = {
        let pipeline = ExtractionPipeline::new(Arc::clone(&factory), config);
        pipeline.run(template, cancel).await
    };

    match Arc::try_unwrap(factory) {
        Ok(factory) => factory.shutdown().await?,
        Err(_) => log::warn!("Browser factory still shared after run; skipping shutdown"),
    }
    Ok(result)
}

//! End-to-end extraction run
//!
//! [`ExtractionPipeline::run`] validates a template, walks its listing,
//! enriches items from detail pages and assembles a [`ScrapeResult`]. It never
//! fails as a whole: every problem ends up either on an item or in
//! `run_errors`, so callers always get whatever was extracted.

use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::crawl_types::{FailureKind, RunError, RunPhase, ScrapeResult};
use super::detail_fetch::DetailFetcher;
use super::page_timeout::with_page_timeout;
use super::progress::{NoOpProgress, ProgressReporter};
use super::rate_limiter::RateLimiter;
use super::retry::{RetryPolicy, retry_with_backoff};
use super::traversal::{ListTraversal, TraversalEnd};
use crate::config::ExtractConfig;
use crate::extractor::FieldResolver;
use crate::page_source::{PageSource, PageSourceFactory};
use crate::template::Template;

/// Runs templates against sessions from one factory
pub struct ExtractionPipeline<F: PageSourceFactory> {
    factory: Arc<F>,
    config: ExtractConfig,
    resolver: FieldResolver,
    progress: Arc<dyn ProgressReporter>,
    shared_limiter: Option<Arc<RateLimiter>>,
}

impl<F: PageSourceFactory> ExtractionPipeline<F> {
    pub fn new(factory: Arc<F>, config: ExtractConfig) -> Self {
        Self {
            factory,
            config,
            resolver: FieldResolver::default(),
            progress: Arc::new(NoOpProgress),
            shared_limiter: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Share one limiter across runs.
    ///
    /// Without it every run gets a fresh limiter built from the config and
    /// the template's `rate_limit_preset`. A shared limiter keeps its own
    /// configuration; template presets do not apply to it.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.shared_limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: FieldResolver) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    fn limiter_for(&self, template: &Template) -> Arc<RateLimiter> {
        if let Some(shared) = &self.shared_limiter {
            return Arc::clone(shared);
        }
        let default = template
            .rate_limit()
            .ok()
            .flatten()
            .unwrap_or(*self.config.rate_limit());
        let limiter = RateLimiter::new(default);
        for (destination, config) in self.config.destination_rate_limits() {
            limiter.set_destination_config(destination, *config);
        }
        Arc::new(limiter)
    }

    /// Run one template to completion or cancellation
    pub async fn run(&self, template: &Template, cancel: CancellationToken) -> ScrapeResult {
        let mut result = ScrapeResult::begin(&template.name);
        self.progress.report_run_started(&template.name);
        result
            .metadata
            .insert("site_url".to_string(), json!(template.site_url));

        if let Err(e) = template.validate() {
            warn!("Template '{}' rejected: {e}", template.name);
            self.fail(
                &mut result,
                RunError::new(RunPhase::Configuration, FailureKind::Configuration, e.to_string()),
            );
            return self.finish(result);
        }

        let limiter = self.limiter_for(template);
        self.extract(template, &limiter, &mut result, &cancel).await;
        result.rate_limit_stats = limiter.stats();

        if cancel.is_cancelled() && !result.is_cancelled() {
            let phase = if result.items.is_empty() || template.detail.is_none() {
                RunPhase::Listing
            } else {
                RunPhase::Detail
            };
            self.fail(
                &mut result,
                RunError::new(phase, FailureKind::Cancelled, "run cancelled"),
            );
        }
        self.finish(result)
    }

    async fn extract(
        &self,
        template: &Template,
        limiter: &Arc<RateLimiter>,
        result: &mut ScrapeResult,
        cancel: &CancellationToken,
    ) {
        let session = match self.factory.open().await {
            Ok(session) => session,
            Err(e) => {
                self.fail(
                    result,
                    RunError::new(
                        RunPhase::Listing,
                        FailureKind::Session,
                        format!("could not open listing session: {e}"),
                    ),
                );
                return;
            }
        };

        self.progress.report_navigation_started(&template.site_url);
        let policy = RetryPolicy::from_config(&self.config);
        let page = &session;
        let url = template.site_url.as_str();
        let timeout_secs = self.config.navigation_timeout_secs();
        let navigated = retry_with_backoff(
            &policy,
            cancel,
            "listing navigation",
            move |attempt| async move {
                debug!("Navigating to listing {url} (attempt {attempt})");
                with_page_timeout(page.navigate(url), timeout_secs, "listing navigation")
                    .await
                    .map_err(anyhow::Error::from)
            },
        )
        .await;

        if let Err(e) = navigated {
            let kind = FailureKind::classify(&e);
            self.fail(
                result,
                RunError::new(RunPhase::Listing, kind, format!("{e:#}")),
            );
            close_session(&session).await;
            return;
        }

        let outcome = ListTraversal::new(
            &template.list,
            &template.load_strategy,
            &self.resolver,
            self.config.load_more_keywords(),
        )
        .with_progress(self.progress.as_ref())
        .run(&session, cancel)
        .await;
        close_session(&session).await;

        result
            .metadata
            .insert("traversal_end".to_string(), json!(outcome.end.as_str()));
        result.metadata.insert(
            "load_actions".to_string(),
            json!(outcome.state.actions_performed),
        );
        if !outcome.warnings.is_empty() {
            result
                .metadata
                .insert("traversal_warnings".to_string(), json!(outcome.warnings));
        }
        result.items = outcome.items;

        if outcome.end == TraversalEnd::Cancelled {
            self.fail(
                result,
                RunError::new(RunPhase::Listing, FailureKind::Cancelled, "run cancelled"),
            );
            return;
        }

        let Some(detail_rules) = &template.detail else {
            return;
        };
        let fetcher = DetailFetcher::new(
            Arc::clone(&self.factory),
            Arc::clone(limiter),
            detail_rules.clone(),
            &self.config,
        )
        .with_resolver(self.resolver.clone())
        .with_progress(Arc::clone(&self.progress));

        fetcher.run(&mut result.items, cancel).await;

        for pass in 1..=self.config.detail_retry_passes() {
            if cancel.is_cancelled() {
                break;
            }
            let retried = fetcher.retry_failed(&mut result.items, cancel).await;
            if retried == 0 {
                break;
            }
            info!("Detail retry pass {pass}: re-fetched {retried} items");
        }
    }

    fn fail(&self, result: &mut ScrapeResult, error: RunError) {
        self.progress.report_error(&error.message);
        result.run_errors.push(error);
    }

    fn finish(&self, mut result: ScrapeResult) -> ScrapeResult {
        result.finish();
        info!(
            "Run {} for '{}' finished: {} items, {} failed, {} run errors",
            result.run_id,
            result.template_name,
            result.total_items(),
            result.failed_count,
            result.run_errors.len()
        );
        self.progress
            .report_completed(result.total_items(), result.failed_count);
        result
    }
}

async fn close_session<P: PageSource + ?Sized>(page: &P) {
    if let Err(e) = page.close().await {
        debug!("Could not close listing session: {e}");
    }
}

//! Concurrent detail page enrichment
//!
//! Items with a `detail_url` are fed through a shared job queue to a fixed
//! set of tokio workers. Every worker owns one page session, opened on first
//! use, so sessions are never shared. Per item a worker:
//!
//! 1. stops early when the run is cancelled
//! 2. waits for rate limiter admission for the URL's destination
//! 3. navigates, bounded by the navigation timeout
//! 4. resolves the detail rule set against the whole page
//!
//! Failures (panics included) land on the item being processed and never
//! affect other items.

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::crawl_types::{ExtractError, FailureKind, ItemError, RunPhase, ScrapedItem};
use super::page_timeout::with_page_timeout;
use super::progress::{NoOpProgress, ProgressReporter};
use super::rate_limiter::{AcquireOutcome, RateLimiter};
use crate::config::ExtractConfig;
use crate::extractor::{FieldResolver, ResolvedFields, Scope};
use crate::page_source::{PageError, PageSource, PageSourceFactory};
use crate::template::RuleSet;
use crate::utils::url_utils::destination_key;

/// Result of processing one detail page
#[derive(Debug, Default)]
struct DetailOutcome {
    fields: Option<IndexMap<String, String>>,
    errors: Vec<ItemError>,
}

impl DetailOutcome {
    fn failed(error: impl Into<ItemError>) -> Self {
        let error: ItemError = error.into();
        Self {
            fields: None,
            errors: vec![error.in_phase(RunPhase::Detail)],
        }
    }

    fn resolved(resolved: ResolvedFields) -> Self {
        let errors = resolved
            .failures
            .into_iter()
            .map(|(field, source)| {
                ItemError::from(ExtractError::Field { field, source }).in_phase(RunPhase::Detail)
            })
            .collect();
        Self {
            fields: Some(resolved.values),
            errors,
        }
    }
}

/// Everything a worker task needs, owned so it can be spawned
struct Worker<F: PageSourceFactory> {
    id: usize,
    factory: Arc<F>,
    rules: Arc<RuleSet>,
    resolver: FieldResolver,
    limiter: Arc<RateLimiter>,
    progress: Arc<dyn ProgressReporter>,
    acquire_timeout: Duration,
    navigation_timeout_secs: u64,
}

impl<F: PageSourceFactory> Worker<F> {
    async fn run(
        self,
        queue: Arc<Mutex<VecDeque<(usize, String)>>>,
        cancel: CancellationToken,
    ) -> Vec<(usize, DetailOutcome)> {
        let mut session: Option<F::Source> = None;
        let mut results = Vec::new();

        loop {
            let job = queue.lock().pop_front();
            let Some((index, url)) = job else {
                break;
            };

            let outcome = AssertUnwindSafe(self.process(&mut session, &url, &cancel))
                .catch_unwind()
                .await;
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Detail worker {} panicked on {url}: {message}", self.id);
                    // The session may be mid-operation; start the next item fresh
                    if let Some(page) = session.take()
                        && let Err(e) = page.close().await
                    {
                        debug!("Detail worker {} could not close its session: {e}", self.id);
                    }
                    DetailOutcome::failed(ExtractError::Panicked(message))
                }
            };

            self.progress
                .report_detail_fetched(index, outcome.errors.is_empty());
            results.push((index, outcome));
        }

        if let Some(page) = session
            && let Err(e) = page.close().await
        {
            debug!("Detail worker {} could not close its session: {e}", self.id);
        }
        results
    }

    async fn process(
        &self,
        session: &mut Option<F::Source>,
        url: &str,
        cancel: &CancellationToken,
    ) -> DetailOutcome {
        if cancel.is_cancelled() {
            return DetailOutcome::failed(ExtractError::Cancelled);
        }

        let destination = destination_key(url).unwrap_or_else(|| url.to_string());
        match self
            .limiter
            .acquire(&destination, Some(self.acquire_timeout), cancel)
            .await
        {
            AcquireOutcome::Granted => {}
            AcquireOutcome::TimedOut => {
                return DetailOutcome::failed(ExtractError::RateLimited {
                    destination,
                    timeout_secs: self.acquire_timeout.as_secs(),
                });
            }
            AcquireOutcome::Cancelled => return DetailOutcome::failed(ExtractError::Cancelled),
        }

        match self.fetch(session, url).await {
            Ok(resolved) => DetailOutcome::resolved(resolved),
            Err(e) => {
                if e.kind() == FailureKind::Session {
                    *session = None;
                }
                debug!("Detail page {url} failed: {e}");
                DetailOutcome::failed(e)
            }
        }
    }

    async fn fetch(
        &self,
        session: &mut Option<F::Source>,
        url: &str,
    ) -> Result<ResolvedFields, ExtractError> {
        if session.is_none() {
            let opened = self.factory.open().await.map_err(ExtractError::Session)?;
            *session = Some(opened);
        }
        let Some(page) = session.as_ref() else {
            return Err(ExtractError::Session(PageError::SessionClosed));
        };

        with_page_timeout(
            page.navigate(url),
            self.navigation_timeout_secs,
            "detail navigation",
        )
        .await?;

        Ok(self
            .resolver
            .resolve_all(page, Scope::Page, &self.rules.fields)
            .await)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Enriches listing items from their detail pages
pub struct DetailFetcher<F: PageSourceFactory> {
    factory: Arc<F>,
    rules: Arc<RuleSet>,
    resolver: FieldResolver,
    limiter: Arc<RateLimiter>,
    progress: Arc<dyn ProgressReporter>,
    concurrency: usize,
    acquire_timeout: Duration,
    navigation_timeout_secs: u64,
}

impl<F: PageSourceFactory> DetailFetcher<F> {
    /// # Arguments
    /// * `factory` - Opens one session per worker
    /// * `limiter` - Shared admission control keyed by destination
    /// * `rules` - Detail rule set of the template
    /// * `config` - Concurrency and timeouts
    pub fn new(
        factory: Arc<F>,
        limiter: Arc<RateLimiter>,
        rules: RuleSet,
        config: &ExtractConfig,
    ) -> Self {
        Self {
            factory,
            rules: Arc::new(rules),
            resolver: FieldResolver::default(),
            limiter,
            progress: Arc::new(NoOpProgress),
            concurrency: config.detail_concurrency(),
            acquire_timeout: config.acquire_timeout(),
            navigation_timeout_secs: config.navigation_timeout_secs(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: FieldResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Fetch detail pages for every item that has a `detail_url`
    pub async fn run(&self, items: &mut [ScrapedItem], cancel: &CancellationToken) {
        let indices: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.detail_url.as_deref().is_some_and(|u| !u.is_empty()))
            .map(|(index, _)| index)
            .collect();
        self.run_on(items, &indices, cancel).await;
    }

    /// Fetch again for items whose detail errors are all retryable.
    ///
    /// The old detail errors are replaced by the outcome of the new attempt;
    /// errors recorded while reading the listing stay on the item.
    /// Returns the number of items retried.
    pub async fn retry_failed(&self, items: &mut [ScrapedItem], cancel: &CancellationToken) -> usize {
        let indices: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.needs_detail_retry())
            .map(|(index, _)| index)
            .collect();
        for &index in &indices {
            items[index].reset_detail();
        }
        self.run_on(items, &indices, cancel).await;
        indices.len()
    }

    async fn run_on(&self, items: &mut [ScrapedItem], indices: &[usize], cancel: &CancellationToken) {
        let jobs: VecDeque<(usize, String)> = indices
            .iter()
            .filter_map(|&index| {
                items
                    .get(index)
                    .and_then(|item| item.detail_url.clone())
                    .map(|url| (index, url))
            })
            .collect();
        if jobs.is_empty() {
            return;
        }

        let workers = self.concurrency.clamp(1, jobs.len());
        info!(
            "Fetching {} detail pages with {workers} workers",
            jobs.len()
        );
        let queue = Arc::new(Mutex::new(jobs));

        let mut tasks = FuturesUnordered::new();
        for id in 0..workers {
            let worker = Worker {
                id,
                factory: Arc::clone(&self.factory),
                rules: Arc::clone(&self.rules),
                resolver: self.resolver.clone(),
                limiter: Arc::clone(&self.limiter),
                progress: Arc::clone(&self.progress),
                acquire_timeout: self.acquire_timeout,
                navigation_timeout_secs: self.navigation_timeout_secs,
            };
            tasks.push(tokio::spawn(worker.run(Arc::clone(&queue), cancel.clone())));
        }

        let mut outcomes: HashMap<usize, DetailOutcome> = HashMap::with_capacity(indices.len());
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok(results) => outcomes.extend(results),
                Err(e) => error!("Detail worker task failed: {e}"),
            }
        }

        for &index in indices {
            let Some(item) = items.get_mut(index) else {
                continue;
            };
            match outcomes.remove(&index) {
                Some(outcome) => {
                    if outcome.fields.is_some() {
                        item.detail_fields = outcome.fields;
                    }
                    item.errors.extend(outcome.errors);
                }
                None => {
                    warn!("Detail page for item {} was never processed", item.sequence_index);
                    item.push_error(
                        ItemError::new(
                            FailureKind::Unknown,
                            "detail worker stopped before processing this item",
                        )
                        .in_phase(RunPhase::Detail),
                    );
                }
            }
        }
    }
}

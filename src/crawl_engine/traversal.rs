//! Listing traversal
//!
//! Drives one listing page session through its load strategy and turns every
//! repeating element into exactly one [`ScrapedItem`]:
//!
//! ```text
//! Idle -> Extracting -> Triggering -> Extracting -> ... -> Done
//!                            \-> Stalled (one grace action) -/
//! ```
//!
//! Elements already consumed from the current view are never extracted
//! again. Click-driven strategies may replace the listing instead of
//! appending to it (classic pagination); that is detected from the page URL
//! and the first element's text, and the view offset restarts at zero while
//! `sequence_index` keeps counting.

use log::{debug, info, trace, warn};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::crawl_types::{ExtractError, FailureKind, ItemError, ScrapedItem};
use super::progress::{NoOpProgress, ProgressReporter};
use crate::extractor::{FieldResolver, Scope};
use crate::page_source::{ElementHandle, PageError, PageSource};
use crate::template::{LoadKind, LoadStrategyConfig, RuleSet};
use crate::utils::constants::{LOAD_MORE_CANDIDATE_LOCATOR, MAX_LOAD_MORE_TEXT_CHARS};
use crate::utils::string_utils::{char_len, comparable, normalize_whitespace};
use crate::utils::url_utils::resolve_link;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalPhase {
    #[default]
    Idle,
    Extracting,
    Triggering,
    /// The no-growth limit was reached; the next action is the grace attempt
    Stalled,
    Done,
}

/// Progress of one traversal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraversalState {
    /// Items produced so far; the next item's `sequence_index`
    pub processed_count: usize,
    pub consecutive_no_growth: u32,
    pub phase: TraversalPhase,
    pub actions_performed: u32,
    pub grace_used: bool,
}

/// Why a traversal stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalEnd {
    /// No repeating item locator: the page is one item
    SinglePage,
    /// Load strategy `none`
    NoLoadStrategy,
    /// The load control disappeared, was disabled or could not be clicked
    Exhausted,
    /// No growth after the failure limit and the grace attempt
    Stalled,
    Cancelled,
}

impl TraversalEnd {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SinglePage => "single_page",
            Self::NoLoadStrategy => "no_load_strategy",
            Self::Exhausted => "exhausted",
            Self::Stalled => "stalled",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
pub struct TraversalOutcome {
    /// In `sequence_index` order
    pub items: Vec<ScrapedItem>,
    pub state: TraversalState,
    pub end: TraversalEnd,
    /// Action-level problems that ended or degraded the traversal
    pub warnings: Vec<String>,
}

/// What one load action did
#[derive(Debug, Clone, Copy, PartialEq)]
enum LoadAction {
    Clicked,
    Scrolled { height: f64 },
    /// Nothing left to trigger
    Exhausted,
}

impl LoadAction {
    fn label(self) -> &'static str {
        match self {
            Self::Clicked => "click",
            Self::Scrolled { .. } => "scroll",
            Self::Exhausted => "none",
        }
    }
}

/// What the traversal has seen of the current listing view
#[derive(Debug, Default)]
struct ListingView {
    /// Elements of this view already turned into items
    offset: usize,
    url: String,
    /// Normalized text of the first repeating element
    first_fingerprint: Option<String>,
}

/// Walks one listing according to its rule set and load strategy
pub struct ListTraversal<'a> {
    rules: &'a RuleSet,
    load: &'a LoadStrategyConfig,
    resolver: &'a FieldResolver,
    keywords: &'a [String],
    progress: &'a dyn ProgressReporter,
}

impl<'a> ListTraversal<'a> {
    /// # Arguments
    /// * `rules` - List rule set of the template
    /// * `load` - How to reveal more items
    /// * `resolver` - Shared field resolver
    /// * `keywords` - Lowercase load-more keywords for `auto` mode, in priority order
    #[must_use]
    pub fn new(
        rules: &'a RuleSet,
        load: &'a LoadStrategyConfig,
        resolver: &'a FieldResolver,
        keywords: &'a [String],
    ) -> Self {
        Self {
            rules,
            load,
            resolver,
            keywords,
            progress: &NoOpProgress,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Traverse the listing currently loaded in `page`
    pub async fn run<P: PageSource + ?Sized>(
        &self,
        page: &P,
        cancel: &CancellationToken,
    ) -> TraversalOutcome {
        let mut outcome = TraversalOutcome {
            items: Vec::new(),
            state: TraversalState::default(),
            end: TraversalEnd::Exhausted,
            warnings: Vec::new(),
        };

        if cancel.is_cancelled() {
            outcome.end = TraversalEnd::Cancelled;
            outcome.state.phase = TraversalPhase::Done;
            return outcome;
        }

        let Some(item_locator) = self.rules.repeating_item_locator.as_deref() else {
            let url = current_url(page, &mut outcome.warnings).await;
            outcome.state.phase = TraversalPhase::Extracting;
            let item = self.build_item(page, Scope::Page, &url, 0).await;
            outcome.items.push(item);
            outcome.state.processed_count = 1;
            outcome.state.phase = TraversalPhase::Done;
            outcome.end = TraversalEnd::SinglePage;
            self.progress.report_items_discovered(1);
            return outcome;
        };

        let mut view = ListingView::default();
        outcome.state.phase = TraversalPhase::Extracting;
        self.extract_pass(page, item_locator, &mut view, &mut outcome, false)
            .await;

        outcome.end = if self.load.kind == LoadKind::None {
            TraversalEnd::NoLoadStrategy
        } else {
            self.load_loop(page, item_locator, &mut view, &mut outcome, cancel)
                .await
        };

        if outcome.end != TraversalEnd::Cancelled && outcome.state.actions_performed > 0 {
            outcome.state.phase = TraversalPhase::Extracting;
            self.extract_pass(page, item_locator, &mut view, &mut outcome, false)
                .await;
        }

        outcome.state.phase = TraversalPhase::Done;
        info!(
            "Listing traversal finished ({}): {} items after {} load actions",
            outcome.end.as_str(),
            outcome.state.processed_count,
            outcome.state.actions_performed
        );
        outcome
    }

    async fn load_loop<P: PageSource + ?Sized>(
        &self,
        page: &P,
        item_locator: &str,
        view: &mut ListingView,
        outcome: &mut TraversalOutcome,
        cancel: &CancellationToken,
    ) -> TraversalEnd {
        let mut last_height = page.scroll_height().await.unwrap_or(0.0);

        loop {
            if cancel.is_cancelled() {
                return TraversalEnd::Cancelled;
            }

            let grace = outcome.state.phase == TraversalPhase::Stalled;
            outcome.state.phase = TraversalPhase::Triggering;

            let action = match self.trigger(page).await {
                Ok(LoadAction::Exhausted) => {
                    debug!("No load control left; listing exhausted");
                    return TraversalEnd::Exhausted;
                }
                Ok(action) => action,
                Err(e) => {
                    warn!("Load action failed, ending traversal: {e}");
                    outcome.warnings.push(format!("load action failed: {e}"));
                    return TraversalEnd::Exhausted;
                }
            };

            outcome.state.actions_performed += 1;
            if grace {
                outcome.state.grace_used = true;
            }
            self.progress
                .report_load_action(action.label(), outcome.state.actions_performed);

            let wait = if grace {
                self.load.extended_pause()
            } else {
                self.load.pause()
            };
            if !pause(cancel, wait).await {
                return TraversalEnd::Cancelled;
            }

            outcome.state.phase = TraversalPhase::Extracting;
            let clicked = action == LoadAction::Clicked;
            let new_items = self
                .extract_pass(page, item_locator, view, outcome, clicked)
                .await;

            let grew = match action {
                LoadAction::Scrolled { height } => {
                    let taller = height > last_height;
                    last_height = height;
                    new_items > 0 || taller
                }
                _ => {
                    last_height = page.scroll_height().await.unwrap_or(last_height);
                    new_items > 0
                }
            };

            if grew {
                outcome.state.consecutive_no_growth = 0;
                outcome.state.grace_used = false;
                continue;
            }

            outcome.state.consecutive_no_growth += 1;
            trace!(
                "No growth after {} action ({} in a row)",
                action.label(),
                outcome.state.consecutive_no_growth
            );
            if grace {
                debug!("Grace attempt produced nothing; listing stalled");
                return TraversalEnd::Stalled;
            }
            if outcome.state.consecutive_no_growth >= self.load.consecutive_failure_limit {
                debug!(
                    "Listing stalled after {} actions without growth; one grace attempt left",
                    outcome.state.consecutive_no_growth
                );
                outcome.state.phase = TraversalPhase::Stalled;
            }
        }
    }

    /// Perform the strategy's next load action
    async fn trigger<P: PageSource + ?Sized>(&self, page: &P) -> Result<LoadAction, PageError> {
        match self.load.kind {
            LoadKind::Button | LoadKind::Pagination => {
                let locator = self.load.action_locator.as_deref().unwrap_or_default();
                let Some(control) = page.find_all(locator, None).await?.first().copied() else {
                    return Ok(LoadAction::Exhausted);
                };
                if !page.is_interactable(control).await? {
                    return Ok(LoadAction::Exhausted);
                }
                page.click(control).await?;
                Ok(LoadAction::Clicked)
            }
            LoadKind::Scroll => Ok(LoadAction::Scrolled {
                height: page.scroll_to_bottom().await?,
            }),
            LoadKind::Auto => match self.discover_control(page).await {
                Some(control) => {
                    page.click(control).await?;
                    Ok(LoadAction::Clicked)
                }
                None => Ok(LoadAction::Scrolled {
                    height: page.scroll_to_bottom().await?,
                }),
            },
            LoadKind::None => Ok(LoadAction::Exhausted),
        }
    }

    /// Find a clickable load-more control by keyword.
    ///
    /// Keywords are tried in priority order; within one keyword the first
    /// interactable candidate in document order wins.
    async fn discover_control<P: PageSource + ?Sized>(&self, page: &P) -> Option<ElementHandle> {
        let candidates = match page.find_all(LOAD_MORE_CANDIDATE_LOCATOR, None).await {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!("Load-more discovery failed: {e}");
                return None;
            }
        };

        let mut labelled = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut text = page.text_of(candidate).await.unwrap_or_default();
            if text.trim().is_empty() {
                // Submit inputs carry their label in `value`
                text = page
                    .attribute_of(candidate, "value")
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
            }
            let text = comparable(&text);
            if !text.is_empty() && char_len(&text) < MAX_LOAD_MORE_TEXT_CHARS {
                labelled.push((candidate, text));
            }
        }

        for keyword in self.keywords {
            for (candidate, text) in &labelled {
                if text.contains(keyword.as_str())
                    && page.is_interactable(*candidate).await.unwrap_or(false)
                {
                    trace!("Load-more control found by keyword '{keyword}': '{text}'");
                    return Some(*candidate);
                }
            }
        }
        None
    }

    /// Extract every element of the current view not consumed yet.
    ///
    /// Returns the number of new items.
    async fn extract_pass<P: PageSource + ?Sized>(
        &self,
        page: &P,
        item_locator: &str,
        view: &mut ListingView,
        outcome: &mut TraversalOutcome,
        after_click: bool,
    ) -> usize {
        let elements = match page.find_all(item_locator, None).await {
            Ok(elements) => elements,
            Err(e) => {
                warn!("Could not scan listing items: {e}");
                outcome.warnings.push(format!("item scan failed: {e}"));
                return 0;
            }
        };

        let fingerprint = match elements.first() {
            Some(first) => page
                .text_of(*first)
                .await
                .ok()
                .map(|t| normalize_whitespace(&t)),
            None => None,
        };
        let url = current_url(page, &mut outcome.warnings).await;

        if after_click && view.offset > 0 {
            let first_changed = fingerprint != view.first_fingerprint;
            let url_changed = url != view.url && elements.len() <= view.offset;
            if first_changed || url_changed {
                debug!(
                    "Listing replaced (url {} -> {url}); restarting view offset",
                    view.url
                );
                view.offset = 0;
            }
        }
        view.first_fingerprint = fingerprint;
        view.url = url;

        let mut new_items = 0;
        for element in elements.iter().skip(view.offset) {
            let index = outcome.state.processed_count;
            let item = self
                .build_item(page, Scope::Element(*element), &view.url, index)
                .await;
            outcome.items.push(item);
            outcome.state.processed_count += 1;
            new_items += 1;
        }
        view.offset = view.offset.max(elements.len());

        if new_items > 0 {
            self.progress
                .report_items_discovered(outcome.state.processed_count);
        }
        new_items
    }

    async fn build_item<P: PageSource + ?Sized>(
        &self,
        page: &P,
        scope: Scope,
        source_url: &str,
        sequence_index: usize,
    ) -> ScrapedItem {
        let mut item = ScrapedItem::new(source_url, sequence_index);
        let resolved = self
            .resolver
            .resolve_all(page, scope, &self.rules.fields)
            .await;
        item.fields = resolved.values;
        let failed_fields: Vec<String> = resolved.failures.iter().map(|(f, _)| f.clone()).collect();
        for (field, source) in resolved.failures {
            item.push_error(ExtractError::Field { field, source });
        }

        if let Some(link_field) = &self.rules.detail_link_field {
            match item.fields.get(link_field) {
                Some(link) => match resolve_link(source_url, link) {
                    Some(url) => item.detail_url = Some(url),
                    None => {
                        let error = ExtractError::InvalidLink {
                            link: link.clone(),
                            base: source_url.to_string(),
                        };
                        item.push_error(error);
                    }
                },
                None if !failed_fields.contains(link_field) => {
                    item.push_error(ItemError::new(
                        FailureKind::Locator,
                        format!("detail link field '{link_field}' produced no value"),
                    ));
                }
                None => {}
            }
        }
        item
    }
}

async fn current_url<P: PageSource + ?Sized>(page: &P, warnings: &mut Vec<String>) -> String {
    match page.current_url().await {
        Ok(url) => url,
        Err(e) => {
            warnings.push(format!("could not read page url: {e}"));
            String::new()
        }
    }
}

/// Cancellable sleep; `false` when cancelled
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

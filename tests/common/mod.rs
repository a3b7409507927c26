//! Test utilities for the template_scraper test suite
//!
//! `FakeDom` is a tiny element tree with explicit locator matches, texts,
//! attributes and layout boxes. `FakeSite` scripts a listing (append,
//! replace or scroll driven) plus static detail pages and failure injection.
//! `FakePage` serves either through the `PageSource` trait, and
//! `FakeFactory` hands out `FakePage` sessions while counting them.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use template_scraper::page_source::{
    BoundingBox, ElementHandle, PageError, PageSource, PageSourceFactory,
};
use template_scraper::utils::constants::LOAD_MORE_CANDIDATE_LOCATOR;

pub const LISTING_URL: &str = "https://firm.example.com/people";
pub const CARD: &str = "div.card";
pub const NAME: &str = "h2.name";
pub const PROFILE_LINK: &str = "a.profile";
pub const LOAD_MORE: &str = "button.load-more";

#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    pub parent: Option<usize>,
    pub matches: Vec<String>,
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub bbox: Option<BoundingBox>,
    pub interactable: bool,
    /// Candidate for load-more discovery
    pub clickable: bool,
    /// Reading this node's text fails
    pub broken: bool,
}

/// Element tree in document order; node 0 is `body`
#[derive(Debug, Clone)]
pub struct FakeDom {
    pub nodes: Vec<FakeNode>,
}

impl Default for FakeDom {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDom {
    pub fn new() -> Self {
        Self {
            nodes: vec![FakeNode {
                matches: vec!["body".to_string()],
                interactable: true,
                ..FakeNode::default()
            }],
        }
    }

    pub fn body(&self) -> usize {
        0
    }

    /// Append a node under `parent` and return its id
    pub fn add(&mut self, parent: usize, locator: &str, text: &str) -> usize {
        self.nodes.push(FakeNode {
            parent: Some(parent),
            matches: locator
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            text: text.to_string(),
            interactable: true,
            ..FakeNode::default()
        });
        self.nodes.len() - 1
    }

    pub fn attr(&mut self, node: usize, name: &str, value: &str) -> &mut Self {
        self.nodes[node]
            .attrs
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn bbox(&mut self, node: usize, x: f64, y: f64, width: f64, height: f64) -> &mut Self {
        self.nodes[node].bbox = Some(BoundingBox::new(x, y, width, height));
        self
    }

    pub fn clickable(&mut self, node: usize, interactable: bool) -> &mut Self {
        self.nodes[node].clickable = true;
        self.nodes[node].interactable = interactable;
        self
    }

    pub fn broken(&mut self, node: usize) -> &mut Self {
        self.nodes[node].broken = true;
        self
    }

    fn is_descendant(&self, node: usize, ancestor: usize) -> bool {
        let mut current = self.nodes[node].parent;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.nodes[parent].parent;
        }
        false
    }

    fn matches(&self, node: usize, locator: &str) -> bool {
        let n = &self.nodes[node];
        locator == "*"
            || (locator == LOAD_MORE_CANDIDATE_LOCATOR && n.clickable)
            || n.matches.iter().any(|m| m == locator)
    }

    pub fn find_all(
        &self,
        locator: &str,
        scope: Option<usize>,
    ) -> Result<Vec<usize>, PageError> {
        if locator.starts_with("!!") {
            return Err(PageError::InvalidLocator {
                locator: locator.to_string(),
                message: "unsupported syntax".to_string(),
            });
        }
        Ok((0..self.nodes.len())
            .filter(|&id| match scope {
                Some(root) => self.is_descendant(id, root),
                None => true,
            })
            .filter(|&id| self.matches(id, locator))
            .collect())
    }

    pub fn text_of(&self, node: usize) -> Result<String, PageError> {
        let mut parts = Vec::new();
        for id in node..self.nodes.len() {
            if id == node || self.is_descendant(id, node) {
                if self.nodes[id].broken {
                    return Err(PageError::Script(format!("text of node {id} unavailable")));
                }
                if !self.nodes[id].text.is_empty() {
                    parts.push(self.nodes[id].text.clone());
                }
            }
        }
        Ok(parts.join(" "))
    }

    fn node(&self, handle: ElementHandle) -> Result<&FakeNode, PageError> {
        self.nodes
            .get(handle.0 as usize)
            .ok_or(PageError::StaleHandle(handle))
    }
}

/// One listing entry
#[derive(Debug, Clone)]
pub struct ItemSpec {
    pub name: String,
    pub href: Option<String>,
}

impl ItemSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            href: None,
        }
    }

    pub fn linked(name: &str, href: &str) -> Self {
        Self {
            name: name.to_string(),
            href: Some(href.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealMode {
    /// Clicking the control appends the next batch
    Append,
    /// Clicking the control replaces the listing with the next batch
    Replace,
    /// Scrolling to the bottom appends the next batch
    Scroll,
}

#[derive(Debug, Clone)]
pub struct ListingScript {
    pub batches: Vec<Vec<ItemSpec>>,
    pub mode: RevealMode,
    /// Text of the load control; `None` means no control at all
    pub control_text: Option<String>,
    /// Keep the control visible after the last batch
    pub control_persists: bool,
    pub control_interactable: bool,
}

impl ListingScript {
    pub fn new(mode: RevealMode, batches: Vec<Vec<ItemSpec>>) -> Self {
        Self {
            batches,
            mode,
            control_text: match mode {
                RevealMode::Scroll => None,
                _ => Some("Load more".to_string()),
            },
            control_persists: false,
            control_interactable: true,
        }
    }

    pub fn with_control(mut self, text: Option<&str>) -> Self {
        self.control_text = text.map(str::to_string);
        self
    }

    pub fn persistent_control(mut self) -> Self {
        self.control_persists = true;
        self
    }
}

/// `count` items named "Person {start}".."Person {start+count-1}" linking to detail pages
pub fn people(start: usize, count: usize) -> Vec<ItemSpec> {
    (start..start + count)
        .map(|i| ItemSpec::linked(&format!("Person {i}"), &format!("/people/{i}")))
        .collect()
}

pub fn detail_url(i: usize) -> String {
    format!("https://firm.example.com/people/{i}")
}

/// A detail page with one `.email` node and one `.title` node
pub fn detail_dom(email: &str, title: &str) -> FakeDom {
    let mut dom = FakeDom::new();
    dom.add(0, "p.email", email);
    dom.add(0, "p.title", title);
    dom
}

#[derive(Debug, Default)]
struct SiteCounters {
    in_flight: usize,
    max_in_flight: usize,
}

/// Scripted website shared by every session of a factory
#[derive(Debug)]
pub struct FakeSite {
    pub listing: Option<ListingScript>,
    pub details: HashMap<String, FakeDom>,
    /// Navigations to these URLs always fail
    pub failing: HashSet<String>,
    /// Navigations to these URLs fail this many more times
    pub flaky: Mutex<HashMap<String, usize>>,
    /// Navigations to these URLs panic
    pub panicking: HashSet<String>,
    /// Time a detail navigation takes
    pub detail_delay: Duration,
    navigations: Mutex<Vec<(String, tokio::time::Instant)>>,
    counters: Mutex<SiteCounters>,
}

impl FakeSite {
    pub fn new(listing: Option<ListingScript>) -> Self {
        Self {
            listing,
            details: HashMap::new(),
            failing: HashSet::new(),
            flaky: Mutex::new(HashMap::new()),
            panicking: HashSet::new(),
            detail_delay: Duration::ZERO,
            navigations: Mutex::new(Vec::new()),
            counters: Mutex::new(SiteCounters::default()),
        }
    }

    /// Detail pages for every item of every batch
    pub fn with_details_for_listing(mut self) -> Self {
        let hrefs: Vec<String> = self
            .listing
            .iter()
            .flat_map(|l| l.batches.iter().flatten())
            .filter_map(|item| item.href.clone())
            .collect();
        for href in hrefs {
            let url = format!("https://firm.example.com{href}");
            let slug = href.rsplit('/').next().unwrap_or_default().to_string();
            self.details.insert(
                url,
                detail_dom(&format!("person{slug}@firm.example.com"), "Partner"),
            );
        }
        self
    }

    pub fn with_detail(mut self, url: &str, dom: FakeDom) -> Self {
        self.details.insert(url.to_string(), dom);
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn flaky(self, url: &str, failures: usize) -> Self {
        self.flaky.lock().insert(url.to_string(), failures);
        self
    }

    pub fn panicking(mut self, url: &str) -> Self {
        self.panicking.insert(url.to_string());
        self
    }

    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
        self
    }

    /// Navigation log in order
    pub fn navigations(&self) -> Vec<(String, tokio::time::Instant)> {
        self.navigations.lock().clone()
    }

    pub fn navigation_count(&self, url: &str) -> usize {
        self.navigations.lock().iter().filter(|(u, _)| u == url).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.counters.lock().max_in_flight
    }

    fn listing_view(&self, revealed: usize) -> (String, FakeDom) {
        let mut dom = FakeDom::new();
        let Some(script) = &self.listing else {
            return (LISTING_URL.to_string(), dom);
        };

        let last = revealed.min(script.batches.len().saturating_sub(1));
        let visible: Vec<&ItemSpec> = match script.mode {
            RevealMode::Replace => script.batches.get(last).into_iter().flatten().collect(),
            RevealMode::Append | RevealMode::Scroll => {
                script.batches[..=last].iter().flatten().collect()
            }
        };

        for item in visible {
            let card = dom.add(0, CARD, "");
            dom.add(card, NAME, &item.name);
            if let Some(href) = &item.href {
                let link = dom.add(card, PROFILE_LINK, "Profile");
                dom.attr(link, "href", href);
            }
        }

        let more_left = last + 1 < script.batches.len();
        if let Some(text) = &script.control_text
            && (more_left || script.control_persists)
        {
            let control = dom.add(0, LOAD_MORE, text);
            dom.clickable(control, script.control_interactable);
        }

        let url = if script.mode == RevealMode::Replace && last > 0 {
            format!("{LISTING_URL}?page={}", last + 1)
        } else {
            LISTING_URL.to_string()
        };
        (url, dom)
    }
}

#[derive(Debug)]
struct PageState {
    url: String,
    dom: FakeDom,
    revealed: usize,
    on_listing: bool,
}

/// One scripted page session
pub struct FakePage {
    site: Arc<FakeSite>,
    state: Mutex<PageState>,
    pub clicks: AtomicUsize,
    pub scrolls: AtomicUsize,
    pub closed: AtomicUsize,
}

impl FakePage {
    pub fn new(site: Arc<FakeSite>) -> Self {
        Self {
            site,
            state: Mutex::new(PageState {
                url: "about:blank".to_string(),
                dom: FakeDom::new(),
                revealed: 0,
                on_listing: false,
            }),
            clicks: AtomicUsize::new(0),
            scrolls: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    /// A session already showing `dom`
    pub fn with_dom(dom: FakeDom) -> Self {
        let page = Self::new(Arc::new(FakeSite::new(None)));
        {
            let mut state = page.state.lock();
            state.url = "https://static.example.com/".to_string();
            state.dom = dom;
        }
        page
    }

    pub fn actions(&self) -> usize {
        self.clicks.load(Ordering::SeqCst) + self.scrolls.load(Ordering::SeqCst)
    }

    fn reveal_next(&self) {
        let mut state = self.state.lock();
        if !state.on_listing {
            return;
        }
        state.revealed += 1;
        let (url, dom) = self.site.listing_view(state.revealed);
        state.url = url;
        state.dom = dom;
    }

    fn height(&self) -> f64 {
        let state = self.state.lock();
        100.0 * state.dom.find_all(CARD, None).map(|c| c.len()).unwrap_or(0) as f64
    }
}

#[async_trait]
impl PageSource for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.site
            .navigations
            .lock()
            .push((url.to_string(), tokio::time::Instant::now()));

        if self.site.panicking.contains(url) {
            panic!("renderer crashed on {url}");
        }

        let is_detail = self.site.details.contains_key(url);
        if is_detail {
            {
                let mut counters = self.site.counters.lock();
                counters.in_flight += 1;
                counters.max_in_flight = counters.max_in_flight.max(counters.in_flight);
            }
            if !self.site.detail_delay.is_zero() {
                tokio::time::sleep(self.site.detail_delay).await;
            }
            self.site.counters.lock().in_flight -= 1;
        }

        let flaky_failure = {
            let mut flaky = self.site.flaky.lock();
            match flaky.get_mut(url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if flaky_failure || self.site.failing.contains(url) {
            return Err(PageError::Navigation {
                url: url.to_string(),
                message: "connection reset".to_string(),
            });
        }

        let mut state = self.state.lock();
        if url == LISTING_URL && self.site.listing.is_some() {
            let (view_url, dom) = self.site.listing_view(0);
            state.url = view_url;
            state.dom = dom;
            state.revealed = 0;
            state.on_listing = true;
            return Ok(());
        }
        match self.site.details.get(url) {
            Some(dom) => {
                state.url = url.to_string();
                state.dom = dom.clone();
                state.on_listing = false;
                Ok(())
            }
            None => Err(PageError::Navigation {
                url: url.to_string(),
                message: "404 not found".to_string(),
            }),
        }
    }

    async fn find_all(
        &self,
        locator: &str,
        scope: Option<ElementHandle>,
    ) -> Result<Vec<ElementHandle>, PageError> {
        let state = self.state.lock();
        if let Some(handle) = scope {
            state.dom.node(handle)?;
        }
        let ids = state
            .dom
            .find_all(locator, scope.map(|h| h.0 as usize))?;
        Ok(ids.into_iter().map(|id| ElementHandle(id as u64)).collect())
    }

    async fn text_of(&self, element: ElementHandle) -> Result<String, PageError> {
        let state = self.state.lock();
        state.dom.node(element)?;
        state.dom.text_of(element.0 as usize)
    }

    async fn attribute_of(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, PageError> {
        let state = self.state.lock();
        Ok(state.dom.node(element)?.attrs.get(name).cloned())
    }

    async fn click(&self, element: ElementHandle) -> Result<(), PageError> {
        let is_control = {
            let state = self.state.lock();
            state.dom.node(element)?.matches.iter().any(|m| m == LOAD_MORE)
        };
        self.clicks.fetch_add(1, Ordering::SeqCst);
        let click_reveals = self
            .site
            .listing
            .as_ref()
            .is_some_and(|l| l.mode != RevealMode::Scroll);
        if is_control && click_reveals {
            self.reveal_next();
        }
        Ok(())
    }

    async fn is_interactable(&self, element: ElementHandle) -> Result<bool, PageError> {
        let state = self.state.lock();
        Ok(state.dom.node(element)?.interactable)
    }

    async fn bounding_box(&self, element: ElementHandle) -> Result<Option<BoundingBox>, PageError> {
        let state = self.state.lock();
        Ok(state.dom.node(element)?.bbox)
    }

    async fn scroll_to_bottom(&self) -> Result<f64, PageError> {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
        let scroll_reveals = self
            .site
            .listing
            .as_ref()
            .is_some_and(|l| l.mode == RevealMode::Scroll);
        if scroll_reveals {
            self.reveal_next();
        }
        Ok(self.height())
    }

    async fn scroll_height(&self) -> Result<f64, PageError> {
        Ok(self.height())
    }

    async fn current_url(&self) -> Result<String, PageError> {
        Ok(self.state.lock().url.clone())
    }

    async fn close(&self) -> Result<(), PageError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens `FakePage` sessions on one shared site
pub struct FakeFactory {
    pub site: Arc<FakeSite>,
    pub opens: AtomicUsize,
    /// The first this-many `open` calls fail
    pub failing_opens: AtomicUsize,
}

impl FakeFactory {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            opens: AtomicUsize::new(0),
            failing_opens: AtomicUsize::new(0),
        }
    }

    pub fn failing_first_opens(self, count: usize) -> Self {
        self.failing_opens.store(count, Ordering::SeqCst);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSourceFactory for FakeFactory {
    type Source = FakePage;

    async fn open(&self) -> Result<Self::Source, PageError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(PageError::Backend("tab limit reached".to_string()));
        }
        Ok(FakePage::new(Arc::clone(&self.site)))
    }
}

/// Install a test logger once; ignores repeated calls
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

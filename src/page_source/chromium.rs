//! chromiumoxide backend for [`PageSource`]
//!
//! One browser process is shared by every session a factory opens; each
//! session is a separate tab. Elements returned by chromiumoxide are kept in a
//! per-session registry and exposed as [`ElementHandle`] indexes into it.
//! Repeated lookups of the same DOM node reuse its handle, so re-scanning a
//! growing listing only registers the new nodes. The registry is cleared on
//! every navigation, which makes old handles stale.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::element::Element;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{BoundingBox, ElementHandle, PageError, PageSource, PageSourceFactory, is_xpath};
use crate::browser_setup::launch_browser;
use crate::config::ExtractConfig;

const INTERACTABLE_JS: &str = r"function() {
    if (this.disabled || this.getAttribute('aria-disabled') === 'true') { return false; }
    const style = window.getComputedStyle(this);
    if (style.display === 'none' || style.visibility === 'hidden' || style.pointerEvents === 'none') { return false; }
    const rect = this.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
}";

const BOUNDING_BOX_JS: &str = r"function() {
    const rect = this.getBoundingClientRect();
    if (rect.width === 0 && rect.height === 0) { return null; }
    return JSON.stringify({ x: rect.left + window.scrollX, y: rect.top + window.scrollY, width: rect.width, height: rect.height });
}";

const SCROLL_TO_BOTTOM_JS: &str = r"(() => {
    const el = document.scrollingElement || document.documentElement;
    window.scrollTo(0, el.scrollHeight);
    return el.scrollHeight;
})()";

const SCROLL_HEIGHT_JS: &str =
    "(document.scrollingElement || document.documentElement).scrollHeight";

const PAGE_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

#[derive(Debug, Deserialize)]
struct JsRect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Elements handed out by one session, keyed by DOM node
struct ElementRegistry<E> {
    elements: Vec<Arc<E>>,
    by_node: HashMap<i64, ElementHandle>,
}

impl<E> Default for ElementRegistry<E> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
            by_node: HashMap::new(),
        }
    }
}

impl<E> ElementRegistry<E> {
    /// Handle for `node`, registering `element` only when the node is new
    fn insert(&mut self, node: i64, element: E) -> ElementHandle {
        if let Some(&handle) = self.by_node.get(&node) {
            return handle;
        }
        let handle = ElementHandle(self.elements.len() as u64);
        self.elements.push(Arc::new(element));
        self.by_node.insert(node, handle);
        handle
    }

    fn get(&self, handle: ElementHandle) -> Option<Arc<E>> {
        usize::try_from(handle.0)
            .ok()
            .and_then(|idx| self.elements.get(idx).cloned())
    }

    fn len(&self) -> usize {
        self.elements.len()
    }

    fn clear(&mut self) {
        self.elements.clear();
        self.by_node.clear();
    }
}

/// A single browser tab exposed as a [`PageSource`]
pub struct ChromiumPageSource {
    page: Page,
    elements: Mutex<ElementRegistry<Element>>,
    navigation_timeout_secs: u64,
    action_timeout_secs: u64,
}

impl ChromiumPageSource {
    #[must_use]
    pub fn new(page: Page, navigation_timeout_secs: u64, action_timeout_secs: u64) -> Self {
        Self {
            page,
            elements: Mutex::new(ElementRegistry::default()),
            navigation_timeout_secs,
            action_timeout_secs,
        }
    }

    fn register(&self, found: Vec<Element>) -> Vec<ElementHandle> {
        let mut registry = self.elements.lock();
        let handles = found
            .into_iter()
            .map(|element| {
                let node = *element.backend_node_id.inner();
                registry.insert(node, element)
            })
            .collect();
        trace!("Session registry holds {} elements", registry.len());
        handles
    }

    fn element(&self, handle: ElementHandle) -> Result<Arc<Element>, PageError> {
        self.elements
            .lock()
            .get(handle)
            .ok_or(PageError::StaleHandle(handle))
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, PageError>
    where
        F: Future<Output = Result<T, PageError>>,
    {
        match tokio::time::timeout(Duration::from_secs(self.action_timeout_secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(PageError::Timeout {
                operation: operation.to_string(),
                secs: self.action_timeout_secs,
            }),
        }
    }

    async fn evaluate_f64(&self, script: &str) -> Result<f64, PageError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| PageError::Script(e.to_string()))?;
        result
            .into_value::<f64>()
            .map_err(|e| PageError::Script(e.to_string()))
    }
}

fn backend(e: impl std::fmt::Display) -> PageError {
    PageError::Backend(e.to_string())
}

#[async_trait]
impl PageSource for ChromiumPageSource {
    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        let navigation = async {
            self.page.goto(url).await.map_err(|e| PageError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| PageError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            Ok(())
        };

        match tokio::time::timeout(Duration::from_secs(self.navigation_timeout_secs), navigation)
            .await
        {
            Ok(result) => {
                self.elements.lock().clear();
                debug!("Navigated to {url}");
                result
            }
            Err(_) => Err(PageError::Timeout {
                operation: format!("navigation to {url}"),
                secs: self.navigation_timeout_secs,
            }),
        }
    }

    async fn find_all(
        &self,
        locator: &str,
        scope: Option<ElementHandle>,
    ) -> Result<Vec<ElementHandle>, PageError> {
        let invalid = |e: chromiumoxide::error::CdpError| PageError::InvalidLocator {
            locator: locator.to_string(),
            message: e.to_string(),
        };

        let found = match scope {
            None if is_xpath(locator) => {
                self.bounded("find_xpaths", async {
                    self.page.find_xpaths(locator).await.map_err(invalid)
                })
                .await?
            }
            None => {
                self.bounded("find_elements", async {
                    self.page.find_elements(locator).await.map_err(invalid)
                })
                .await?
            }
            Some(_) if is_xpath(locator) => {
                return Err(PageError::InvalidLocator {
                    locator: locator.to_string(),
                    message: "XPath locators are only supported at page scope".to_string(),
                });
            }
            Some(handle) => {
                let parent = self.element(handle)?;
                self.bounded("find_elements", async {
                    parent.find_elements(locator).await.map_err(invalid)
                })
                .await?
            }
        };

        trace!("Locator '{locator}' matched {} elements", found.len());
        Ok(self.register(found))
    }

    async fn text_of(&self, element: ElementHandle) -> Result<String, PageError> {
        let element = self.element(element)?;
        self.bounded("inner_text", async {
            element
                .inner_text()
                .await
                .map(Option::unwrap_or_default)
                .map_err(backend)
        })
        .await
    }

    async fn attribute_of(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, PageError> {
        let element = self.element(element)?;
        self.bounded("attribute", async {
            element.attribute(name).await.map_err(backend)
        })
        .await
    }

    async fn click(&self, element: ElementHandle) -> Result<(), PageError> {
        let element = self.element(element)?;
        self.bounded("click", async {
            element.scroll_into_view().await.map_err(backend)?;
            element.click().await.map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn is_interactable(&self, element: ElementHandle) -> Result<bool, PageError> {
        let element = self.element(element)?;
        let returns = self
            .bounded("is_interactable", async {
                element
                    .call_js_fn(INTERACTABLE_JS, false)
                    .await
                    .map_err(|e| PageError::Script(e.to_string()))
            })
            .await?;
        Ok(returns
            .result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn bounding_box(&self, element: ElementHandle) -> Result<Option<BoundingBox>, PageError> {
        let element = self.element(element)?;
        let returns = self
            .bounded("bounding_box", async {
                element
                    .call_js_fn(BOUNDING_BOX_JS, false)
                    .await
                    .map_err(|e| PageError::Script(e.to_string()))
            })
            .await?;

        // Objects come back by reference, so the script returns JSON text
        let Some(json) = returns.result.value.as_ref().and_then(|v| v.as_str()) else {
            return Ok(None);
        };
        let rect: JsRect =
            serde_json::from_str(json).map_err(|e| PageError::Script(e.to_string()))?;
        Ok(Some(BoundingBox::new(rect.x, rect.y, rect.width, rect.height)))
    }

    async fn scroll_to_bottom(&self) -> Result<f64, PageError> {
        self.bounded("scroll_to_bottom", self.evaluate_f64(SCROLL_TO_BOTTOM_JS))
            .await
    }

    async fn scroll_height(&self) -> Result<f64, PageError> {
        self.bounded("scroll_height", self.evaluate_f64(SCROLL_HEIGHT_JS))
            .await
    }

    async fn current_url(&self) -> Result<String, PageError> {
        match self.page.url().await {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Ok("about:blank".to_string()),
            Err(e) => Err(backend(e)),
        }
    }

    async fn page_text(&self) -> Result<String, PageError> {
        self.bounded("page_text", async {
            self.page
                .evaluate(PAGE_TEXT_JS)
                .await
                .map_err(|e| PageError::Script(e.to_string()))?
                .into_value::<String>()
                .map_err(|e| PageError::Script(e.to_string()))
        })
        .await
    }

    async fn close(&self) -> Result<(), PageError> {
        self.elements.lock().clear();
        self.page.clone().close().await.map_err(backend)
    }
}

/// Opens one tab per session on a shared browser process.
///
/// Call [`ChromiumPageSourceFactory::shutdown`] once the run is finished; it
/// closes the browser, stops the CDP handler and removes a generated profile directory.
pub struct ChromiumPageSourceFactory {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
    user_data_dir: PathBuf,
    /// The profile directory was generated for this launch
    temporary_profile: bool,
    navigation_timeout_secs: u64,
    action_timeout_secs: u64,
}

impl ChromiumPageSourceFactory {
    /// Find or download Chromium and launch it with the configured options
    pub async fn launch(config: &ExtractConfig) -> Result<Self> {
        let (browser, handler_task, user_data_dir) =
            launch_browser(config.headless(), config.chrome_data_dir().cloned())
                .await
                .context("Failed to launch browser")?;

        Ok(Self {
            browser: Arc::new(browser),
            handler_task,
            user_data_dir,
            temporary_profile: config.chrome_data_dir().is_none(),
            navigation_timeout_secs: config.navigation_timeout_secs(),
            action_timeout_secs: config.action_timeout_secs(),
        })
    }

    /// Close the browser and remove the profile directory if it was generated.
    ///
    /// Sessions still open at this point are closed with the browser.
    pub async fn shutdown(self) -> Result<()> {
        match Arc::try_unwrap(self.browser) {
            Ok(mut browser) => {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close browser: {e}");
                }
                if let Err(e) = browser.wait().await {
                    warn!("Failed to wait for browser exit: {e}");
                }
            }
            Err(arc) => {
                warn!(
                    "Browser still has {} strong references, cleanup will happen on drop",
                    Arc::strong_count(&arc)
                );
            }
        }

        self.handler_task.abort();
        if let Err(e) = self.handler_task.await
            && !e.is_cancelled()
        {
            warn!("Handler task failed during abort: {e}");
        }

        if self.temporary_profile
            && let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await
        {
            warn!(
                "Failed to remove browser profile {}: {e}",
                self.user_data_dir.display()
            );
        }

        info!("Browser shut down");
        Ok(())
    }
}

#[async_trait]
impl PageSourceFactory for ChromiumPageSourceFactory {
    type Source = ChromiumPageSource;

    async fn open(&self) -> Result<Self::Source, PageError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(backend)?;
        Ok(ChromiumPageSource::new(
            page,
            self.navigation_timeout_secs,
            self.action_timeout_secs,
        ))
    }
}

//! Page access abstraction
//!
//! The extraction core never talks to a browser directly. Everything it needs
//! from a rendered page goes through [`PageSource`]: locating elements, reading
//! their text and attributes, clicking, scrolling and measuring layout.
//!
//! A [`PageSourceFactory`] hands out independent sessions. The listing
//! traversal runs on one session; every detail worker opens its own, so a
//! session is never shared between concurrent tasks.
//!
//! [`chromium`] provides the production backend on top of chromiumoxide.

pub mod chromium;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chromium::{ChromiumPageSource, ChromiumPageSourceFactory};

/// Whether a locator is XPath rather than CSS.
///
/// Locators starting with `//` or `(` are XPath; CSS selectors never start
/// with either. XPath is only evaluated at page scope.
#[must_use]
pub fn is_xpath(locator: &str) -> bool {
    let locator = locator.trim_start();
    locator.starts_with("//") || locator.starts_with('(')
}

/// Opaque reference to an element inside one page session.
///
/// Handles are only meaningful for the session that produced them and become
/// stale once that session navigates away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(pub u64);

/// Element geometry in page coordinates (CSS pixels, scroll offset included)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point of the box
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Euclidean distance between the centers of two boxes
    #[must_use]
    pub fn center_distance(&self, other: &Self) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (bx - ax).hypot(by - ay)
    }
}

/// Failures reported by a page access backend
#[derive(Debug, Clone, Error)]
pub enum PageError {
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("invalid locator '{locator}': {message}")]
    InvalidLocator { locator: String, message: String },

    #[error("stale element handle {0:?}")]
    StaleHandle(ElementHandle),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("{operation} timed out after {secs} seconds")]
    Timeout { operation: String, secs: u64 },

    #[error("page session is closed")]
    SessionClosed,

    #[error("page backend error: {0}")]
    Backend(String),
}

/// Capability the extraction core needs from one rendered page session.
///
/// All methods take `&self`; implementations use interior mutability for
/// handle bookkeeping. A session is driven by one task at a time.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Load `url` and wait until the document is ready
    async fn navigate(&self, url: &str) -> Result<(), PageError>;

    /// All elements matching `locator`, in document order.
    ///
    /// With a `scope`, only descendants of that element are searched.
    async fn find_all(
        &self,
        locator: &str,
        scope: Option<ElementHandle>,
    ) -> Result<Vec<ElementHandle>, PageError>;

    /// Rendered text of an element, descendants included
    async fn text_of(&self, element: ElementHandle) -> Result<String, PageError>;

    async fn attribute_of(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, PageError>;

    async fn click(&self, element: ElementHandle) -> Result<(), PageError>;

    /// Whether the element is displayed and enabled
    async fn is_interactable(&self, element: ElementHandle) -> Result<bool, PageError>;

    /// Layout box of the element, `None` when it is not rendered
    async fn bounding_box(&self, element: ElementHandle) -> Result<Option<BoundingBox>, PageError>;

    /// Scroll to the bottom of the document and return the new scroll height
    async fn scroll_to_bottom(&self) -> Result<f64, PageError>;

    async fn scroll_height(&self) -> Result<f64, PageError>;

    async fn current_url(&self) -> Result<String, PageError>;

    /// Visible text of the whole document
    async fn page_text(&self) -> Result<String, PageError> {
        match self.find_all("body", None).await?.first() {
            Some(body) => self.text_of(*body).await,
            None => Ok(String::new()),
        }
    }

    /// Release backend resources held by this session
    async fn close(&self) -> Result<(), PageError> {
        Ok(())
    }
}

/// Opens independent page sessions.
#[async_trait]
pub trait PageSourceFactory: Send + Sync + 'static {
    type Source: PageSource + 'static;

    async fn open(&self) -> Result<Self::Source, PageError>;
}

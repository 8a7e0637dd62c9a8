//! Opaque browser automation capability used by the login driver.

pub mod targets;
pub mod webdriver;

use anyhow::Result;
use async_trait::async_trait;

pub use targets::{wait_for_any, Condition, Step, Target, TargetKind, TargetParseError, Targets, Trigger};
pub use webdriver::{WebDriverConfig, WebDriverFactory};

/// Handle to an element located on the current page.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// One live browser session.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// All elements matching a CSS selector, in document order.
    async fn locate(&self, css: &str) -> Result<Vec<ElementRef>>;

    async fn is_visible(&self, element: &ElementRef) -> Result<bool>;

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool>;

    async fn text(&self, element: &ElementRef) -> Result<String>;

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>>;

    /// Clear the element and type `value` into it.
    async fn fill(&self, element: &ElementRef, value: &str) -> Result<()>;

    async fn click(&self, element: &ElementRef) -> Result<()>;

    /// Press Enter inside the element.
    async fn submit(&self, element: &ElementRef) -> Result<()>;

    /// Visible text of the whole page.
    async fn page_text(&self) -> Result<String>;

    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrowserFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Browser>>;
}

//! Browser driver capability.
//!
//! The engine never talks to a browser directly. Embedders implement
//! [`BrowserDriver`] and [`Locator`] on top of their automation library of
//! choice; the engine only relies on the contract below:
//!
//! - every call that can block receives an explicit timeout and must give
//!   up once it elapses, returning [`DriverError::Timeout`];
//! - a page or browser that disappeared surfaces as [`DriverError::Closed`];
//! - other failures are distinguishable as not-found, unavailable
//!   (hidden, disabled, occluded) or generic.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors reported by a driver implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("timed out after {}ms: {detail}", .after.as_millis())]
    Timeout { detail: String, after: Duration },

    #[error("no element matches {target}")]
    NotFound { target: String },

    #[error("{target} is not interactable: {detail}")]
    Unavailable { target: String, detail: String },

    #[error("page closed: {detail}")]
    Closed { detail: String },

    #[error("{message}")]
    Other { message: String },
}

impl DriverError {
    pub fn timeout(detail: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            detail: detail.into(),
            after,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// What to locate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    /// A selector in whatever syntax the driver supports (CSS, `role=`,
    /// `text=`, ...).
    Selector(String),
    /// An element whose visible text matches.
    Text(String),
    /// Elements with visible text `text` inside elements matched by `scope`.
    TextWithin { scope: String, text: String },
}

impl Query {
    /// Human-readable form, also used as the lookup key by scripted drivers.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Selector(selector) => selector.clone(),
            Self::Text(text) => format!("text={text}"),
            Self::TextWithin { scope, text } => format!("{scope} >> text={text}"),
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// How an option is chosen in a `<select>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectBy {
    Label(String),
    Value(String),
}

/// A lazily-resolved handle to zero or more elements.
#[async_trait]
pub trait Locator: Send + Sync {
    /// Click the first matched element.
    async fn click(&self, timeout: Duration) -> DriverResult<()>;

    /// Replace the value of the matched input.
    async fn fill(&self, value: &str, timeout: Duration) -> DriverResult<()>;

    /// Choose an option in the matched select element.
    async fn select_option(&self, option: &SelectBy, timeout: Duration) -> DriverResult<()>;

    /// Wait until the matched element is visible.
    async fn wait_visible(&self, timeout: Duration) -> DriverResult<()>;

    /// Number of elements currently matched.
    async fn count(&self, timeout: Duration) -> DriverResult<usize>;

    /// Handle to the `index`-th matched element.
    fn nth(&self, index: usize) -> Box<dyn Locator>;
}

/// Script run to ask whether keyboard focus sits inside a nested frame.
pub const FRAME_FOCUS_PROBE_JS: &str = "(() => { const el = document.activeElement; \
     return !!el && (el.tagName === 'IFRAME' || el.tagName === 'FRAME'); })()";

/// Script run to move focus back to the top-level document.
pub const FRAME_FOCUS_RELEASE_JS: &str = "(() => { const el = document.activeElement; \
     if (el && typeof el.blur === 'function') { el.blur(); } window.focus(); \
     const again = document.activeElement; \
     return !again || (again.tagName !== 'IFRAME' && again.tagName !== 'FRAME'); })()";

/// The page the engine drives.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate the page to `url`.
    async fn navigate(&self, url: &str, timeout: Duration) -> DriverResult<()>;

    /// Build a locator. Resolution happens when the locator is used.
    fn locate(&self, query: &Query) -> Box<dyn Locator>;

    /// Capture a PNG screenshot of the viewport.
    async fn screenshot(&self, timeout: Duration) -> DriverResult<Vec<u8>>;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&self, script: &str, timeout: Duration) -> DriverResult<Value>;

    /// Current page URL.
    async fn current_url(&self) -> DriverResult<String>;

    /// Current page title.
    async fn current_title(&self) -> DriverResult<String>;

    /// True once the page or browser has gone away.
    fn is_closed(&self) -> bool;

    /// Scroll the viewport, used as a nudge between retry rounds.
    async fn scroll_by(&self, dx: i64, dy: i64, timeout: Duration) -> DriverResult<()> {
        self.evaluate(&format!("window.scrollBy({dx}, {dy})"), timeout)
            .await
            .map(|_| ())
    }

    /// True when keyboard focus is trapped inside a nested frame.
    async fn frame_focus_locked(&self, timeout: Duration) -> DriverResult<bool> {
        let value = self.evaluate(FRAME_FOCUS_PROBE_JS, timeout).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Try to return focus to the top-level document. Returns true when
    /// focus is no longer inside a frame.
    async fn release_frame_focus(&self, timeout: Duration) -> DriverResult<bool> {
        let value = self.evaluate(FRAME_FOCUS_RELEASE_JS, timeout).await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

//! The browsing capability the pipeline drives.
//!
//! [`BrowserSession`] is deliberately small: context lifecycle, navigation,
//! frame focus, and a handful of selector-addressed DOM reads and actions.
//! Elements are addressed by `(selector, index)` and re-resolved on every
//! call, so a handle can never outlive the document it came from.

use std::fmt;

use async_trait::async_trait;

use crate::error::SessionError;

/// How to match elements in the current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// A CSS selector.
    Css(&'static str),
    /// Elements matching `css` whose text content contains `text`.
    CssWithText {
        css: &'static str,
        text: &'static str,
    },
}

impl Selector {
    #[must_use]
    pub const fn css(css: &'static str) -> Self {
        Selector::Css(css)
    }

    #[must_use]
    pub const fn with_text(css: &'static str, text: &'static str) -> Self {
        Selector::CssWithText { css, text }
    }

    #[must_use]
    pub fn css_part(&self) -> &'static str {
        match self {
            Selector::Css(css) | Selector::CssWithText { css, .. } => css,
        }
    }

    #[must_use]
    pub fn text_part(&self) -> Option<&'static str> {
        match self {
            Selector::Css(_) => None,
            Selector::CssWithText { text, .. } => Some(text),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(css) => write!(f, "{css}"),
            Selector::CssWithText { css, text } => write!(f, "{css}:contains(\"{text}\")"),
        }
    }
}

/// The `index`-th element matching `selector` in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Element {
    pub selector: Selector,
    pub index: usize,
}

impl Element {
    #[must_use]
    pub const fn first(selector: Selector) -> Self {
        Self { selector, index: 0 }
    }

    #[must_use]
    pub const fn nth(selector: Selector, index: usize) -> Self {
        Self { selector, index }
    }
}

/// Where a query looks for matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The focused document (top level, or the entered frame).
    Document,
    /// Descendants of one element.
    Within(Element),
}

/// Opaque identifier of one browsing context (tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(pub String);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A controllable browser session.
///
/// Missing elements are not errors for reads: `count` returns 0, `texts` and
/// `attributes` return empty vectors, `is_visible` returns `false`. Actions on
/// a missing element (`click`, scrolling) return [`SessionError::NotFound`].
#[async_trait]
pub trait BrowserSession: Send {
    /// The context subsequent calls operate on.
    async fn active_context(&mut self) -> Result<ContextId, SessionError>;

    /// Every open context, in creation order.
    async fn contexts(&mut self) -> Result<Vec<ContextId>, SessionError>;

    /// Opens `url` in a new isolated context without activating it. Returns
    /// once the load has started.
    ///
    /// Sessions that cannot create contexts return [`SessionError::Unsupported`].
    async fn open_context(&mut self, url: &str) -> Result<ContextId, SessionError>;

    async fn switch_context(&mut self, id: &ContextId) -> Result<(), SessionError>;

    async fn close_context(&mut self, id: &ContextId) -> Result<(), SessionError>;

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// Begins loading `url` in the active context without waiting for the
    /// load to finish. Defaults to a full [`navigate`](Self::navigate).
    async fn start_navigation(&mut self, url: &str) -> Result<(), SessionError> {
        self.navigate(url).await
    }

    async fn go_back(&mut self) -> Result<(), SessionError>;

    async fn current_url(&mut self) -> Result<String, SessionError>;

    async fn title(&mut self) -> Result<String, SessionError>;

    /// Number of embedded frames in the top-level document.
    async fn frame_count(&mut self) -> Result<usize, SessionError>;

    /// Focuses DOM queries on the `index`-th embedded frame.
    async fn enter_frame(&mut self, index: usize) -> Result<(), SessionError>;

    /// Returns DOM focus to the top-level document.
    async fn exit_frames(&mut self) -> Result<(), SessionError>;

    async fn count(&mut self, scope: Scope, selector: Selector) -> Result<usize, SessionError>;

    /// Rendered text of every match, trimmed.
    async fn texts(&mut self, scope: Scope, selector: Selector)
        -> Result<Vec<String>, SessionError>;

    /// Values of attribute `name` for every match that carries it. `href`
    /// resolves to an absolute URL.
    async fn attributes(
        &mut self,
        scope: Scope,
        selector: Selector,
        name: &str,
    ) -> Result<Vec<String>, SessionError>;

    async fn is_visible(&mut self, element: Element) -> Result<bool, SessionError>;

    async fn is_enabled(&mut self, element: Element) -> Result<bool, SessionError>;

    async fn click(&mut self, element: Element) -> Result<(), SessionError>;

    async fn scroll_into_view(&mut self, element: Element) -> Result<(), SessionError>;

    /// Sets the element's scroll position to its maximum.
    async fn scroll_to_end(&mut self, element: Element) -> Result<(), SessionError>;

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, SessionError>;
}

/// Demotes a recoverable read failure to "nothing found", logging it.
///
/// # Errors
///
/// Propagates [`SessionError::Fatal`] unchanged.
pub(crate) fn soft<T: Default>(
    result: Result<T, SessionError>,
    what: &str,
) -> Result<T, SessionError> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            tracing::debug!(what, error = %err, "DOM read failed; treating as absent");
            Ok(T::default())
        }
    }
}

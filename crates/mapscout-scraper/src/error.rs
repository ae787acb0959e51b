use thiserror::Error;

/// Failures reported by a [`crate::session::BrowserSession`].
///
/// Everything except [`SessionError::Fatal`] is recoverable: callers degrade
/// to "field absent" or "listing skipped" at the smallest enclosing scope.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("no element matches {selector}")]
    NotFound { selector: String },

    #[error("timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("stale handle: {0}")]
    StaleReference(String),

    #[error("not supported by this session: {0}")]
    Unsupported(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("browser session lost: {0}")]
    Fatal(String),
}

impl SessionError {
    /// Returns `true` when the session itself is unusable and the run must stop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Fatal(_))
    }
}

/// Run-level failures. Only these escape the orchestrator.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser session failed: {0}")]
    Session(#[from] SessionError),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("no browser sessions were provided")]
    NoSessions,
}

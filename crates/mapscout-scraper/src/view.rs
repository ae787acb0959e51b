//! Per-listing view lifecycle: open, wait for load, extract, tear down.

use std::time::Duration;

use mapscout_core::ListingDetails;
use tokio::time::{sleep, Instant};

use crate::detail::{capture_snapshot, extract_details, HEADINGS};
use crate::error::SessionError;
use crate::session::{BrowserSession, ContextId};
use crate::wait::{await_condition, first_visible, FatalLatch, WaitPolicy};

const BLANK_PAGE: &str = "about:blank";

/// True when the document has no heading, no frames and almost no text.
const BLANK_CHECK_SCRIPT: &str = r#"(() => {
  const b = document.body;
  const text = (b && b.innerText) || "";
  const hasHeading = !!document.querySelector('h1,[aria-level="1"],[role="heading"]');
  const frames = document.getElementsByTagName('iframe').length;
  return !hasHeading && frames === 0 && text.trim().length < 5;
})()"#;

const FORCE_CLOSE_SCRIPT: &str = "window.close();";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewPolicy {
    /// Upper bound on one listing attempt, from opening the view until the
    /// heading shows.
    pub load_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause between opening a context and switching to it.
    pub open_settle: Duration,
}

impl Default for ViewPolicy {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            open_settle: Duration::from_millis(600),
        }
    }
}

/// How the listing was opened, and therefore how it must be torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ViewMode {
    Isolated(ContextId),
    /// Context creation failed; the listing was loaded in the base context.
    Shared,
}

/// Opens `reference`, waits for it to load and extracts its details.
///
/// Returns `Ok(None)` when the listing did not load within
/// `policy.load_timeout` of this call, or extraction failed. Whatever the outcome, the
/// context this call created is closed and the base context is active again
/// before it returns.
///
/// # Errors
///
/// Returns [`SessionError::Fatal`] if the session is lost.
pub async fn extract_listing<S>(
    session: &mut S,
    reference: &str,
    policy: &ViewPolicy,
) -> Result<Option<ListingDetails>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let deadline = Instant::now() + policy.load_timeout;
    let base = match session.active_context().await {
        Ok(id) => Some(id),
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            tracing::warn!(error = %err, "could not read the active context");
            None
        }
    };

    let outcome = match open_view(session, reference, policy).await {
        Ok(mode) => {
            let result = load_and_extract(session, reference, policy, deadline).await;
            let teardown = close_view(session, mode, base.as_ref()).await;
            result.and_then(|details| teardown.map(|()| details))
        }
        Err(err) => Err(err),
    };

    match outcome {
        Err(err) if !err.is_fatal() => {
            tracing::warn!(reference, error = %err, "listing skipped after an internal error");
            Ok(None)
        }
        other => other,
    }
}

async fn open_view<S>(
    session: &mut S,
    reference: &str,
    policy: &ViewPolicy,
) -> Result<ViewMode, SessionError>
where
    S: BrowserSession + ?Sized,
{
    match session.open_context(reference).await {
        Ok(id) => {
            sleep(policy.open_settle).await;
            match session.switch_context(&id).await {
                Ok(()) => return Ok(ViewMode::Isolated(id)),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::debug!(context = %id, error = %err, "could not switch to the new context");
                    if let Err(err) = session.close_context(&id).await {
                        if err.is_fatal() {
                            return Err(err);
                        }
                    }
                }
            }
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            tracing::debug!(error = %err, "isolated context unavailable, reusing the base context");
        }
    }

    if let Err(err) = session.navigate(BLANK_PAGE).await {
        if err.is_fatal() {
            return Err(err);
        }
        tracing::debug!(error = %err, "could not clear the base context");
    }
    if let Err(err) = session.start_navigation(reference).await {
        if err.is_fatal() {
            return Err(err);
        }
        tracing::debug!(reference, error = %err, "navigation failed");
    }
    Ok(ViewMode::Shared)
}

async fn load_and_extract<S>(
    session: &mut S,
    reference: &str,
    policy: &ViewPolicy,
    deadline: Instant,
) -> Result<Option<ListingDetails>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    if !wait_for_listing(session, remaining, policy.poll_interval).await? {
        tracing::info!(
            reference,
            timeout_secs = policy.load_timeout.as_secs(),
            "listing did not load in time, skipping"
        );
        return Ok(None);
    }

    let snapshot = capture_snapshot(session).await?;
    Ok(Some(extract_details(&snapshot)))
}

/// Polls for a visible listing heading for at most `timeout`. A blank
/// document is only reported; it never ends the wait early.
async fn wait_for_listing<S>(
    session: &mut S,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<bool, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let fatal = FatalLatch::default();
    let latch = fatal.clone();
    let wait = WaitPolicy::new(timeout, poll_interval);
    let loaded = await_condition(session, wait, move |s: &mut S| {
        let latch = latch.clone();
        Box::pin(async move {
            match first_visible(s, HEADINGS).await {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(err) => return latch.record(err),
            }
            match s.evaluate(BLANK_CHECK_SCRIPT).await {
                Ok(serde_json::Value::Bool(true)) => {
                    tracing::debug!("listing view is still blank");
                    false
                }
                Ok(_) => false,
                Err(err) => latch.record(err),
            }
        })
    })
    .await;
    fatal.check()?;
    Ok(loaded)
}

/// Restores the session to its state before [`open_view`].
async fn close_view<S>(
    session: &mut S,
    mode: ViewMode,
    base: Option<&ContextId>,
) -> Result<(), SessionError>
where
    S: BrowserSession + ?Sized,
{
    match mode {
        ViewMode::Isolated(id) => {
            if let Err(err) = session.close_context(&id).await {
                if err.is_fatal() {
                    return Err(err);
                }
                tracing::warn!(context = %id, error = %err, "close failed, forcing window.close()");
                force_close(session, &id).await?;
            }

            let remaining = match session.contexts().await {
                Ok(ids) => ids,
                Err(err) if err.is_fatal() => return Err(err),
                Err(_) => Vec::new(),
            };
            let target = base
                .filter(|b| remaining.contains(*b))
                .or_else(|| remaining.first());
            match target {
                Some(target) => switch_quietly(session, target).await,
                None => {
                    tracing::warn!("no browsing context left after closing the listing view");
                    Ok(())
                }
            }
        }
        ViewMode::Shared => {
            if let Err(err) = session.navigate(BLANK_PAGE).await {
                if err.is_fatal() {
                    return Err(err);
                }
            }
            match base {
                Some(base) => switch_quietly(session, base).await,
                None => Ok(()),
            }
        }
    }
}

async fn force_close<S>(session: &mut S, id: &ContextId) -> Result<(), SessionError>
where
    S: BrowserSession + ?Sized,
{
    let attempt = match session.switch_context(id).await {
        Ok(()) => session.evaluate(FORCE_CLOSE_SCRIPT).await.map(|_| ()),
        Err(err) => Err(err),
    };
    match attempt {
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            tracing::warn!(context = %id, error = %err, "forced close failed");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

async fn switch_quietly<S>(session: &mut S, id: &ContextId) -> Result<(), SessionError>
where
    S: BrowserSession + ?Sized,
{
    match session.switch_context(id).await {
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            tracing::warn!(context = %id, error = %err, "could not switch back to the base context");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

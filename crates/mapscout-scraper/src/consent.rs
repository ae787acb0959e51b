//! Cookie/consent interstitial dismissal.

use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::error::SessionError;
use crate::session::{BrowserSession, Element, Scope, Selector};

/// Affirmative consent controls, most specific first.
pub const CONSENT_BUTTONS: &[Selector] = &[
    Selector::with_text("button", "同意して続行"),
    Selector::with_text("button", "同意する"),
    Selector::with_text("div[role=\"button\"]", "同意"),
    Selector::with_text("button", "I agree"),
    Selector::with_text("button", "Accept all"),
    Selector::with_text("div[role=\"button\"]", "I agree"),
    Selector::with_text("div[role=\"button\"]", "Accept"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Pause after the click so the dialog can close.
    pub dismiss_settle: Duration,
}

impl Default for ConsentPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            poll_interval: Duration::from_millis(400),
            dismiss_settle: Duration::from_millis(500),
        }
    }
}

/// Clicks the first visible, enabled consent control in the top-level
/// document or any embedded frame.
///
/// Returns `false` when nothing was clicked before the deadline. DOM focus is
/// back on the top-level document when this returns, whatever the outcome.
///
/// # Errors
///
/// Returns [`SessionError::Fatal`] if the session is lost.
pub async fn dismiss_consent<S>(session: &mut S, policy: &ConsentPolicy) -> Result<bool, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let outcome = poll_for_consent(session, policy).await;
    if let Err(err) = session.exit_frames().await {
        if err.is_fatal() {
            return Err(err);
        }
        tracing::debug!(error = %err, "could not restore top-level focus after consent check");
    }
    outcome
}

async fn poll_for_consent<S>(session: &mut S, policy: &ConsentPolicy) -> Result<bool, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let deadline = Instant::now() + policy.timeout;
    let step = policy.poll_interval.max(Duration::from_millis(1));
    loop {
        if let Some(element) = find_consent_control(session).await? {
            match session.click(element).await {
                Ok(()) => {
                    tracing::info!(selector = %element.selector, "consent dialog dismissed");
                    sleep(policy.dismiss_settle).await;
                    return Ok(true);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::debug!(error = %err, selector = %element.selector, "consent click failed");
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::debug!("no consent dialog found before the deadline");
            return Ok(false);
        }
        sleep(step.min(deadline - now)).await;
    }
}

/// Searches the top-level document, then each frame. On a hit, focus is left
/// on the document that holds the control so the caller can click it.
async fn find_consent_control<S>(session: &mut S) -> Result<Option<Element>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    if let Err(err) = session.exit_frames().await {
        if err.is_fatal() {
            return Err(err);
        }
    }
    if let Some(element) = clickable_in_focus(session).await? {
        return Ok(Some(element));
    }

    let frames = match session.frame_count().await {
        Ok(n) => n,
        Err(err) if err.is_fatal() => return Err(err),
        Err(_) => 0,
    };
    for index in 0..frames {
        match session.enter_frame(index).await {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::trace!(index, error = %err, "frame not accessible");
                continue;
            }
        }
        if let Some(element) = clickable_in_focus(session).await? {
            return Ok(Some(element));
        }
        if let Err(err) = session.exit_frames().await {
            if err.is_fatal() {
                return Err(err);
            }
        }
    }
    Ok(None)
}

async fn clickable_in_focus<S>(session: &mut S) -> Result<Option<Element>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    for &selector in CONSENT_BUTTONS {
        let matches = match session.count(Scope::Document, selector).await {
            Ok(n) => n,
            Err(err) if err.is_fatal() => return Err(err),
            Err(_) => 0,
        };
        for index in 0..matches {
            let element = Element::nth(selector, index);
            if matches!(session.is_visible(element).await, Ok(true))
                && matches!(session.is_enabled(element).await, Ok(true))
            {
                return Ok(Some(element));
            }
        }
    }
    Ok(None)
}

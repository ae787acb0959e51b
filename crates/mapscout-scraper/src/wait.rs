//! Bounded polling over transient DOM state.
//!
//! Every wait in the pipeline goes through [`await_condition`]: poll a
//! predicate at a fixed interval until it holds or the deadline passes.
//! Timing comes from `tokio::time`, so tests run with a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, Instant};

use crate::error::SessionError;
use crate::session::{BrowserSession, Element, Scope, Selector};

/// Deadline and poll interval for one wait site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub const DEFAULT_POLL: Duration = Duration::from_millis(250);

    #[must_use]
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// A policy polling at [`Self::DEFAULT_POLL`].
    #[must_use]
    pub const fn within(timeout: Duration) -> Self {
        Self::new(timeout, Self::DEFAULT_POLL)
    }
}

/// Outcome of a wait that looks for something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    TimedOut,
}

impl<T> Lookup<T> {
    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound | Lookup::TimedOut => None,
        }
    }

    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Carries a fatal error out of a polling predicate.
///
/// Predicates return `bool`, so a lost session would otherwise look like
/// "not yet" and spin until the deadline. [`FatalLatch::record`] stores the
/// error and tells the predicate to stop polling.
#[derive(Debug, Clone, Default)]
pub struct FatalLatch(Arc<Mutex<Option<SessionError>>>);

impl FatalLatch {
    /// Returns `true` (stop polling) if `err` is fatal, `false` otherwise.
    pub fn record(&self, err: SessionError) -> bool {
        if !err.is_fatal() {
            return false;
        }
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(err);
        }
        true
    }

    /// Re-raises the recorded error, if any.
    ///
    /// # Errors
    ///
    /// Returns the fatal error captured by [`FatalLatch::record`].
    pub fn check(&self) -> Result<(), SessionError> {
        match self.0.lock().ok().and_then(|mut slot| slot.take()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Polls `predicate` until it returns `true` or `policy.timeout` elapses.
///
/// The predicate is evaluated at least once, even with a zero timeout.
/// Returns whether the condition was observed before the deadline.
pub async fn await_condition<S, F>(session: &mut S, policy: WaitPolicy, mut predicate: F) -> bool
where
    S: BrowserSession + ?Sized,
    F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, bool>,
{
    let deadline = Instant::now() + policy.timeout;
    let step = policy.poll_interval.max(Duration::from_millis(1));
    loop {
        if predicate(session).await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(step.min(deadline - now)).await;
    }
}

/// Waits until at least one element matches `selector`.
///
/// # Errors
///
/// Returns [`SessionError::Fatal`] if the session is lost while polling.
pub async fn wait_for_present<S>(
    session: &mut S,
    selector: Selector,
    policy: WaitPolicy,
) -> Result<Lookup<()>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let fatal = FatalLatch::default();
    let latch = fatal.clone();
    let seen = await_condition(session, policy, move |s: &mut S| {
        let latch = latch.clone();
        Box::pin(async move {
            match s.count(Scope::Document, selector).await {
                Ok(n) => n > 0,
                Err(err) => latch.record(err),
            }
        })
    })
    .await;
    fatal.check()?;
    Ok(if seen { Lookup::Found(()) } else { Lookup::TimedOut })
}

/// Waits until the first element of any of `selectors` is visible, and
/// returns the selector that matched.
///
/// # Errors
///
/// Returns [`SessionError::Fatal`] if the session is lost while polling.
pub async fn wait_for_any_visible<S>(
    session: &mut S,
    selectors: &'static [Selector],
    policy: WaitPolicy,
) -> Result<Lookup<Selector>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let hit: Arc<Mutex<Option<Selector>>> = Arc::default();
    let slot = Arc::clone(&hit);
    let fatal = FatalLatch::default();
    let latch = fatal.clone();
    await_condition(session, policy, move |s: &mut S| {
        let slot = Arc::clone(&slot);
        let latch = latch.clone();
        Box::pin(async move {
            match first_visible(s, selectors).await {
                Ok(Some(selector)) => {
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some(selector);
                    }
                    true
                }
                Ok(None) => false,
                Err(err) => latch.record(err),
            }
        })
    })
    .await;
    fatal.check()?;
    let matched = hit.lock().ok().and_then(|guard| *guard);
    Ok(matched.map_or(Lookup::TimedOut, Lookup::Found))
}

/// The first of `selectors` whose first match is currently visible.
///
/// # Errors
///
/// Returns [`SessionError::Fatal`] if the session is lost. Other read
/// failures count as "not visible".
pub async fn first_visible<S>(
    session: &mut S,
    selectors: &[Selector],
) -> Result<Option<Selector>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    for &selector in selectors {
        match session.is_visible(Element::first(selector)).await {
            Ok(true) => return Ok(Some(selector)),
            Ok(false) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(_) => {}
        }
    }
    Ok(None)
}

//! Results feed pagination and reference collection.
//!
//! The feed is a lazily rendered, infinitely scrolling list. Each page is
//! driven through a small state machine: wait for the feed, scroll it until
//! the card count stops growing, collect a reference per card, then try to
//! advance to the next page.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::sleep;

use crate::detail::HEADINGS;
use crate::error::SessionError;
use crate::normalize::{canonical_reference, is_place_url};
use crate::session::{soft, BrowserSession, Element, Scope, Selector};
use crate::wait::{
    await_condition, wait_for_any_visible, wait_for_present, FatalLatch, Lookup, WaitPolicy,
};

pub const FEED: Selector = Selector::css("div[role=\"feed\"]");
pub const CARD: Selector = Selector::css("div.Nv2PK");

/// Anchors that carry a listing link, in priority order.
pub const CARD_ANCHORS: &[Selector] = &[
    Selector::css("a.hfpxzc"),
    Selector::css("a[href*=\"/maps/place/\"]"),
];

/// Pagination controls, in priority order.
pub const NEXT_PAGE_CANDIDATES: &[Selector] = &[
    Selector::css("button[aria-label^=\"次へ\"]"),
    Selector::css("button[aria-label*=\"次\"]"),
    Selector::css("button[aria-label^=\"Next\"]"),
    Selector::with_text("button", "次へ"),
    Selector::with_text("button", "Next"),
    Selector::with_text("a", "次へ"),
    Selector::with_text("a", "Next"),
    Selector::with_text("button", "さらに表示"),
    Selector::with_text("button", "他の結果"),
    Selector::with_text("button", "More results"),
];

/// When to stop scrolling the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollPolicy {
    /// Pause after each scroll before sampling the card count.
    pub settle: Duration,
    /// Consecutive unchanged samples that end scrolling.
    pub stagnation_threshold: u32,
    pub max_iterations: u32,
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1400),
            stagnation_threshold: 5,
            max_iterations: 80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedPolicy {
    /// Wait for the feed after a search or page change.
    pub feed_timeout: Duration,
    /// Wait for a listing heading after clicking a card.
    pub click_timeout: Duration,
    /// Wait for the feed after navigating back or clicking "next".
    pub reacquire_timeout: Duration,
    pub card_settle: Duration,
    pub next_page_settle: Duration,
    pub poll_interval: Duration,
    pub max_pages: u32,
    pub scroll: ScrollPolicy,
}

impl Default for FeedPolicy {
    fn default() -> Self {
        Self {
            feed_timeout: Duration::from_secs(8),
            click_timeout: Duration::from_secs(12),
            reacquire_timeout: Duration::from_secs(12),
            card_settle: Duration::from_millis(200),
            next_page_settle: Duration::from_millis(800),
            poll_interval: WaitPolicy::DEFAULT_POLL,
            max_pages: 5,
            scroll: ScrollPolicy::default(),
        }
    }
}

impl FeedPolicy {
    fn wait(&self, timeout: Duration) -> WaitPolicy {
        WaitPolicy::new(timeout, self.poll_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingFeed,
    Scrolling,
    CollectingReferences { cards: usize },
    AdvancePage,
    Done,
}

/// Walks every results page of the current search and returns the
/// deduplicated listing references.
///
/// # Errors
///
/// Returns [`SessionError::Fatal`] if the session is lost. Everything else
/// ends the affected page or card early and is logged.
pub async fn collect_references<S>(
    session: &mut S,
    policy: &FeedPolicy,
) -> Result<BTreeSet<String>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let mut references = BTreeSet::new();
    let mut page = 1u32;
    let mut phase = if policy.max_pages == 0 {
        Phase::Done
    } else {
        Phase::AwaitingFeed
    };

    loop {
        phase = match phase {
            Phase::AwaitingFeed => {
                match wait_for_present(session, FEED, policy.wait(policy.feed_timeout)).await? {
                    Lookup::Found(()) => Phase::Scrolling,
                    Lookup::NotFound | Lookup::TimedOut => {
                        tracing::info!(page, "no results feed");
                        Phase::Done
                    }
                }
            }
            Phase::Scrolling => {
                let cards = scroll_to_exhaustion(session, &policy.scroll).await?;
                tracing::info!(page, cards, "feed scrolled");
                Phase::CollectingReferences { cards }
            }
            Phase::CollectingReferences { cards } => {
                let found = collect_page(session, policy, cards).await?;
                let page_count = found.len();
                references.extend(found);
                tracing::info!(page, page_count, total = references.len(), "references collected");
                Phase::AdvancePage
            }
            Phase::AdvancePage => {
                if page >= policy.max_pages {
                    tracing::debug!(page, max_pages = policy.max_pages, "page limit reached");
                    Phase::Done
                } else if advance_page(session, policy).await? {
                    page += 1;
                    Phase::AwaitingFeed
                } else {
                    tracing::debug!(page, "no next page");
                    Phase::Done
                }
            }
            Phase::Done => break,
        };
    }

    Ok(references)
}

/// Scrolls the feed to its end until the card count stagnates or the
/// iteration cap is hit. Returns the last observed card count.
///
/// # Errors
///
/// Returns [`SessionError::Fatal`] if the session is lost.
pub async fn scroll_to_exhaustion<S>(
    session: &mut S,
    policy: &ScrollPolicy,
) -> Result<usize, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let mut last_count = 0usize;
    let mut stagnant = 0u32;

    for _ in 0..policy.max_iterations {
        if let Err(err) = session.scroll_to_end(Element::first(FEED)).await {
            if err.is_fatal() {
                return Err(err);
            }
            tracing::debug!(error = %err, "feed scroll failed");
        }
        sleep(policy.settle).await;

        let count = soft(session.count(Scope::Document, CARD).await, "card count")?;
        if count == last_count {
            stagnant += 1;
        } else {
            stagnant = 0;
            last_count = count;
        }
        if stagnant >= policy.stagnation_threshold {
            break;
        }
    }

    Ok(last_count)
}

/// References for one rendered page.
async fn collect_page<S>(
    session: &mut S,
    policy: &FeedPolicy,
    cards: usize,
) -> Result<BTreeSet<String>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let mut references = BTreeSet::new();
    let feed = Scope::Within(Element::first(FEED));
    for &selector in CARD_ANCHORS {
        let hrefs = soft(session.attributes(feed, selector, "href").await, "feed anchors")?;
        references.extend(hrefs.iter().filter_map(|href| canonical_reference(href)));
    }

    for index in 0..cards {
        if references.len() >= cards {
            break;
        }
        let rendered = soft(session.count(Scope::Document, CARD).await, "card count")?;
        if index >= rendered {
            tracing::debug!(index, rendered, "card list shrank, stopping");
            break;
        }

        let card = Element::nth(CARD, index);
        if let Err(err) = session.scroll_into_view(card).await {
            if err.is_fatal() {
                return Err(err);
            }
        }
        sleep(policy.card_settle).await;

        if let Lookup::Found(reference) = direct_reference(session, card).await? {
            references.insert(reference);
            continue;
        }

        let resolution = resolve_by_click(session, policy, card).await?;
        match resolution.reference {
            Lookup::Found(reference) => {
                references.insert(reference);
            }
            Lookup::NotFound => tracing::debug!(index, "card did not open a place"),
            Lookup::TimedOut => tracing::debug!(index, "card detail did not load in time"),
        }
        if !resolution.feed_restored {
            tracing::warn!(index, "results feed could not be re-acquired, ending this page");
            break;
        }
    }

    Ok(references)
}

/// The card's own listing link, if it carries one.
async fn direct_reference<S>(session: &mut S, card: Element) -> Result<Lookup<String>, SessionError>
where
    S: BrowserSession + ?Sized,
{
    for &selector in CARD_ANCHORS {
        let hrefs = soft(
            session.attributes(Scope::Within(card), selector, "href").await,
            "card anchor",
        )?;
        if let Some(reference) = hrefs.first().and_then(|href| canonical_reference(href)) {
            return Ok(Lookup::Found(reference));
        }
    }
    Ok(Lookup::NotFound)
}

struct ClickResolution {
    reference: Lookup<String>,
    feed_restored: bool,
}

/// Clicks `card`, reads the detail location, and returns to the feed.
async fn resolve_by_click<S>(
    session: &mut S,
    policy: &FeedPolicy,
    card: Element,
) -> Result<ClickResolution, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let before = soft(session.current_url().await, "current url")?;

    let reference = match session.click(card).await {
        Ok(()) => {
            let wait = policy.wait(policy.click_timeout);
            match wait_for_any_visible(session, HEADINGS, wait).await? {
                Lookup::Found(_) => {
                    let location = soft(session.current_url().await, "current url")?;
                    canonical_reference(&location).map_or(Lookup::NotFound, Lookup::Found)
                }
                Lookup::NotFound | Lookup::TimedOut => Lookup::TimedOut,
            }
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            tracing::debug!(error = %err, "card click failed");
            Lookup::NotFound
        }
    };

    let after = soft(session.current_url().await, "current url")?;
    if after != before {
        if let Err(err) = session.go_back().await {
            if err.is_fatal() {
                return Err(err);
            }
            tracing::debug!(error = %err, "navigating back to the feed failed");
        } else if !wait_for_return(session, before, policy.wait(policy.reacquire_timeout)).await? {
            tracing::debug!("still on the listing after navigating back");
        }
    }
    let feed_restored = wait_for_present(session, FEED, policy.wait(policy.reacquire_timeout))
        .await?
        .is_found();

    Ok(ClickResolution {
        reference,
        feed_restored,
    })
}

/// Waits until the location is `before` again, or at least no longer a
/// listing, so a feed left over from the detail view is never mistaken for
/// the restored one.
async fn wait_for_return<S>(
    session: &mut S,
    before: String,
    policy: WaitPolicy,
) -> Result<bool, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let fatal = FatalLatch::default();
    let latch = fatal.clone();
    let returned = await_condition(session, policy, move |s: &mut S| {
        let latch = latch.clone();
        let before = before.clone();
        Box::pin(async move {
            match s.current_url().await {
                Ok(url) => url == before || !is_place_url(&url),
                Err(err) => latch.record(err),
            }
        })
    })
    .await;
    fatal.check()?;
    Ok(returned)
}

/// Clicks the first usable pagination control. Returns `true` once a new
/// feed has rendered.
async fn advance_page<S>(session: &mut S, policy: &FeedPolicy) -> Result<bool, SessionError>
where
    S: BrowserSession + ?Sized,
{
    for &candidate in NEXT_PAGE_CANDIDATES {
        if soft(session.count(Scope::Document, candidate).await, "next control")? == 0 {
            continue;
        }
        let control = Element::first(candidate);
        match session.is_enabled(control).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) if err.is_fatal() => return Err(err),
            Err(_) => continue,
        }
        if let Err(err) = session.scroll_into_view(control).await {
            if err.is_fatal() {
                return Err(err);
            }
        }
        sleep(policy.card_settle).await;
        match session.click(control).await {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::debug!(selector = %candidate, error = %err, "next control click failed");
                continue;
            }
        }
        let wait = policy.wait(policy.reacquire_timeout);
        if wait_for_present(session, FEED, wait).await?.is_found() {
            sleep(policy.next_page_settle).await;
            tracing::debug!(selector = %candidate, "advanced to the next page");
            return Ok(true);
        }
    }
    Ok(false)
}

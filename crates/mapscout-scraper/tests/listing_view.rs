//! Integration tests for listing views and consent dismissal.
//!
//! The invariant under test throughout: whatever happens while a listing is
//! open, the session ends with only its base tab, and that tab is active.

mod common;

use std::time::Duration;

use common::{Click, FakeSession, Node, Page, BASE};
use mapscout_scraper::consent::CONSENT_BUTTONS;
use mapscout_scraper::detail::HEADINGS;
use mapscout_scraper::{
    dismiss_consent, extract_listing, BrowserSession, ConsentPolicy, ContextId, Scope,
    SessionError, ViewPolicy,
};

const PLACE: &str = "https://www.google.co.jp/maps/place/Salon+A/@35.6581,139.7017,17z";
const SEARCH: &str = "https://www.google.co.jp/maps/search/?api=1&query=test";

fn salon() -> Page {
    Page::new("Salon A - Google マップ").with(HEADINGS[2], Node::new().text("Salon A"))
}

fn assert_only_base_tab(session: &FakeSession) {
    let base = ContextId(BASE.to_string());
    assert_eq!(session.context_ids(), vec![base.clone()]);
    assert_eq!(session.active_id(), base);
}

// ---------------------------------------------------------------------------
// Listing view lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn loaded_listing_is_extracted_in_its_own_tab() {
    let mut session = FakeSession::new().page(PLACE, salon());

    let details = extract_listing(&mut session, PLACE, &ViewPolicy::default())
        .await
        .unwrap()
        .expect("listing should load");

    assert_eq!(details.company_name, "Salon A");
    assert_eq!(details.google_maps_url, PLACE);
    let coordinates = details.coordinates.expect("coordinates from the URL");
    assert!((coordinates.latitude - 35.6581).abs() < 1e-9);
    assert_eq!(session.opened, vec![PLACE.to_string()]);
    assert!(session.navigations.is_empty());
    assert_only_base_tab(&session);
}

#[tokio::test(start_paused = true)]
async fn listing_that_never_loads_is_skipped_after_the_timeout() {
    let mut session = FakeSession::new();
    let policy = ViewPolicy {
        load_timeout: Duration::from_secs(5),
        ..ViewPolicy::default()
    };
    let start = tokio::time::Instant::now();

    let details = extract_listing(&mut session, PLACE, &policy).await.unwrap();

    assert!(details.is_none());
    assert_eq!(start.elapsed(), policy.load_timeout);
    assert_only_base_tab(&session);
}

#[tokio::test(start_paused = true)]
async fn slow_tab_opening_counts_against_the_load_timeout() {
    let mut session = FakeSession::new();
    session.open_delay = Duration::from_secs(2);
    let policy = ViewPolicy {
        load_timeout: Duration::from_secs(5),
        ..ViewPolicy::default()
    };
    let start = tokio::time::Instant::now();

    let details = extract_listing(&mut session, PLACE, &policy).await.unwrap();

    assert!(details.is_none());
    assert_eq!(start.elapsed(), policy.load_timeout);
    assert_only_base_tab(&session);
}

#[tokio::test(start_paused = true)]
async fn hidden_heading_is_not_taken_as_the_name() {
    let page = salon().with(HEADINGS[0], Node::new().text("Stale Name").hidden());
    let mut session = FakeSession::new().page(PLACE, page);

    let details = extract_listing(&mut session, PLACE, &ViewPolicy::default())
        .await
        .unwrap()
        .expect("listing should load");

    assert_eq!(details.company_name, "Salon A");
}

#[tokio::test(start_paused = true)]
async fn failed_close_falls_back_to_window_close() {
    let mut session = FakeSession::new().page(PLACE, salon());
    session.fail_close = true;

    let details = extract_listing(&mut session, PLACE, &ViewPolicy::default())
        .await
        .unwrap();

    assert!(details.is_some());
    assert_only_base_tab(&session);
}

#[tokio::test(start_paused = true)]
async fn without_tabs_the_listing_loads_in_the_base_tab() {
    let mut session = FakeSession::new().page(PLACE, salon());
    session.navigate(SEARCH).await.unwrap();
    session.navigations.clear();
    session.isolation = false;

    let details = extract_listing(&mut session, PLACE, &ViewPolicy::default())
        .await
        .unwrap();

    assert_eq!(details.map(|d| d.company_name).as_deref(), Some("Salon A"));
    assert_eq!(
        session.navigations,
        vec!["about:blank".to_string(), PLACE.to_string(), "about:blank".to_string()]
    );
    assert!(session.opened.is_empty());
    assert_only_base_tab(&session);
}

#[tokio::test(start_paused = true)]
async fn unusable_new_tab_is_closed_before_falling_back() {
    let mut session = FakeSession::new().page(PLACE, salon());
    session.fail_switch_to_new = true;

    let details = extract_listing(&mut session, PLACE, &ViewPolicy::default())
        .await
        .unwrap();

    assert!(details.is_some());
    assert_eq!(session.opened.len(), 1);
    assert_eq!(session.navigations.first().map(String::as_str), Some("about:blank"));
    assert_only_base_tab(&session);
}

#[tokio::test(start_paused = true)]
async fn lost_session_is_reported_after_cleanup() {
    let mut session = FakeSession::new().page(PLACE, salon());
    session.fatal_on_visible = true;

    let err = extract_listing(&mut session, PLACE, &ViewPolicy::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Fatal(_)));
    assert_only_base_tab(&session);
}

// ---------------------------------------------------------------------------
// Consent
// ---------------------------------------------------------------------------

fn at(url: &str, page: Page) -> FakeSession {
    FakeSession::new().page(url, page)
}

#[tokio::test(start_paused = true)]
async fn top_level_consent_is_clicked() {
    let accept = CONSENT_BUTTONS[4];
    let mut session = at(
        SEARCH,
        Page::new("consent").with(accept, Node::new().on_click(Click::Remove(accept))),
    );
    session.navigate(SEARCH).await.unwrap();

    let dismissed = dismiss_consent(&mut session, &ConsentPolicy::default())
        .await
        .unwrap();

    assert!(dismissed);
    assert_eq!(session.clicks, vec![accept]);
    assert_eq!(session.count(Scope::Document, accept).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn consent_inside_a_frame_is_clicked_and_focus_restored() {
    let agree = CONSENT_BUTTONS[0];
    let mut session = at(
        SEARCH,
        Page::new("consent")
            .with_frame(Node::new())
            .with_frame(Node::new().child(agree, Node::new())),
    );
    session.navigate(SEARCH).await.unwrap();

    let dismissed = dismiss_consent(&mut session, &ConsentPolicy::default())
        .await
        .unwrap();

    assert!(dismissed);
    assert_eq!(session.clicks, vec![agree]);
    // Top-level focus: the frame's control is no longer visible to queries.
    assert_eq!(session.count(Scope::Document, agree).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn hidden_or_disabled_matches_are_passed_over() {
    let agree = CONSENT_BUTTONS[3];
    let mut session = at(
        SEARCH,
        Page::new("consent")
            .with(agree, Node::new().hidden())
            .with(agree, Node::new().disabled())
            .with(agree, Node::new()),
    );
    session.navigate(SEARCH).await.unwrap();

    let dismissed = dismiss_consent(&mut session, &ConsentPolicy::default())
        .await
        .unwrap();

    assert!(dismissed);
    assert_eq!(session.clicks.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn absent_consent_gives_up_at_the_deadline() {
    let mut session = at(SEARCH, Page::new("results"));
    session.navigate(SEARCH).await.unwrap();
    let policy = ConsentPolicy {
        timeout: Duration::from_secs(2),
        ..ConsentPolicy::default()
    };
    let start = tokio::time::Instant::now();

    let dismissed = dismiss_consent(&mut session, &policy).await.unwrap();

    assert!(!dismissed);
    assert!(session.clicks.is_empty());
    assert_eq!(start.elapsed(), policy.timeout);
}

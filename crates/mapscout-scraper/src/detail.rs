//! Field extraction from a loaded listing view.
//!
//! Extraction is split in two. [`capture_snapshot`] performs every DOM read
//! the fields need and records the raw strings in a [`ListingSnapshot`].
//! [`extract_details`] then runs one ordered strategy chain per field over
//! that snapshot; the first strategy returning `Some` wins. The chains are
//! plain function slices, so every fallback is testable without a browser.

use std::collections::HashSet;

use mapscout_core::{Coordinates, ListingDetails};

use crate::error::SessionError;
use crate::normalize::{
    address_line_from_text, clean_href, coordinates_from_static_map, coordinates_from_url,
    find_phone, is_blocked_website, is_social_url, is_wayfinding_link, parse_review_count,
    phone_from_tel_href, split_postal_code,
};
use crate::session::{soft, BrowserSession, Element, Scope, Selector};

/// Listing headings, most specific first. A visible match means the view
/// has loaded.
pub const HEADINGS: &[Selector] = &[
    Selector::css("h1.DUwDvf.lfPIob"),
    Selector::css("h1.fontHeadlineLarge"),
    Selector::css("h1[aria-level=\"1\"]"),
    Selector::css("h1[role=\"heading\"]"),
];

const TITLE_SPAN: Selector = Selector::css("[data-attrid=\"title\"] span");
const OG_TITLE: Selector = Selector::css("meta[property=\"og:title\"]");
const OG_IMAGE: Selector = Selector::css("meta[property=\"og:image\"]");

const CATEGORY_CONTROLS: &[Selector] = &[
    Selector::css("button[jsaction*=\"category\"]"),
    Selector::css("button.DkEaL"),
    Selector::css("a[jsaction*=\"category\"]"),
];

const TEL_LINKS: Selector = Selector::css("a[href^=\"tel:\"]");
const PHONE_BUTTONS: Selector = Selector::css("button[aria-label^=\"電話番号:\"]");

const ADDRESS_CONTROLS: &[Selector] = &[
    Selector::css("button[aria-label^=\"住所:\"]"),
    Selector::css("[data-item-id=\"address\"]"),
];
const ADDRESS_PREFIX: &str = "住所:";

const WEBSITE_CONTROLS: &[Selector] = &[
    Selector::css("a[data-item-id=\"authority\"]"),
    Selector::css("a[aria-label^=\"ウェブサイト:\"]"),
];

pub const MAIN_REGION: Selector = Selector::css("div[role=\"main\"]");
const ANCHORS: Selector = Selector::css("a[href]");
const LABELLED: Selector = Selector::css("[aria-label]");

/// Raw DOM inputs for one listing, captured in a single pass.
///
/// Lists of candidates keep selector priority order, so the first entry is
/// the most specific source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingSnapshot {
    pub url: String,
    pub title: String,
    /// Text of the first match per heading selector (plus the title span),
    /// kept only when that match is visible and non-empty.
    pub headings: Vec<String>,
    pub og_title: Option<String>,
    pub og_image: Option<String>,
    pub categories: Vec<String>,
    pub tel_hrefs: Vec<String>,
    pub phone_labels: Vec<String>,
    pub address_labels: Vec<String>,
    pub website_controls: Vec<String>,
    /// Rendered text of the main region, if present.
    pub main_text: Option<String>,
    /// Anchor targets in the main region, or in the whole document when the
    /// main region is absent. Document order.
    pub anchors: Vec<String>,
    pub aria_labels: Vec<String>,
}

/// Reads every DOM input the field strategies need.
///
/// Individual read failures leave the corresponding field empty.
///
/// # Errors
///
/// Returns [`SessionError::Fatal`] if the session is lost.
pub async fn capture_snapshot<S>(session: &mut S) -> Result<ListingSnapshot, SessionError>
where
    S: BrowserSession + ?Sized,
{
    let url = soft(session.current_url().await, "current url")?;
    let title = soft(session.title().await, "title")?;

    let mut headings = Vec::new();
    for &selector in HEADINGS.iter().chain(std::iter::once(&TITLE_SPAN)) {
        // Only the first match counts, and only while it is rendered.
        if !soft(
            session.is_visible(Element::first(selector)).await,
            "heading visibility",
        )? {
            continue;
        }
        let texts = soft(session.texts(Scope::Document, selector).await, "heading")?;
        if let Some(text) = first_non_empty(texts.into_iter().take(1).collect()) {
            headings.push(text);
        }
    }

    let og_title = first_non_empty(soft(
        session.attributes(Scope::Document, OG_TITLE, "content").await,
        "og:title",
    )?);
    let og_image = first_non_empty(soft(
        session.attributes(Scope::Document, OG_IMAGE, "content").await,
        "og:image",
    )?);

    let mut categories = Vec::new();
    for &selector in CATEGORY_CONTROLS {
        let texts = soft(session.texts(Scope::Document, selector).await, "category")?;
        categories.extend(first_non_empty(texts));
    }

    let tel_hrefs = soft(
        session.attributes(Scope::Document, TEL_LINKS, "href").await,
        "tel links",
    )?;
    let phone_labels = soft(
        session
            .attributes(Scope::Document, PHONE_BUTTONS, "aria-label")
            .await,
        "phone labels",
    )?;

    let mut address_labels = Vec::new();
    for &selector in ADDRESS_CONTROLS {
        address_labels.extend(soft(
            session.attributes(Scope::Document, selector, "aria-label").await,
            "address labels",
        )?);
    }

    let mut website_controls = Vec::new();
    for &selector in WEBSITE_CONTROLS {
        website_controls.extend(soft(
            session.attributes(Scope::Document, selector, "href").await,
            "website controls",
        )?);
    }

    let has_main = soft(session.count(Scope::Document, MAIN_REGION).await, "main region")? > 0;
    let (main_text, anchors) = if has_main {
        let text = first_non_empty(soft(
            session.texts(Scope::Document, MAIN_REGION).await,
            "main text",
        )?);
        let scope = Scope::Within(Element::first(MAIN_REGION));
        let anchors = soft(session.attributes(scope, ANCHORS, "href").await, "anchors")?;
        (text, anchors)
    } else {
        let anchors = soft(
            session.attributes(Scope::Document, ANCHORS, "href").await,
            "anchors",
        )?;
        (None, anchors)
    };

    let aria_labels = soft(
        session
            .attributes(Scope::Document, LABELLED, "aria-label")
            .await,
        "aria labels",
    )?;

    Ok(ListingSnapshot {
        url,
        title,
        headings,
        og_title,
        og_image,
        categories,
        tel_hrefs,
        phone_labels,
        address_labels,
        website_controls,
        main_text,
        anchors,
        aria_labels,
    })
}

fn first_non_empty(values: Vec<String>) -> Option<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// One way of deriving a field from a snapshot.
pub type Strategy<T> = fn(&ListingSnapshot) -> Option<T>;

/// Runs `strategies` in order and returns the first hit.
pub fn resolve<T>(snapshot: &ListingSnapshot, strategies: &[Strategy<T>]) -> Option<T> {
    strategies.iter().find_map(|strategy| strategy(snapshot))
}

pub const NAME_STRATEGIES: &[Strategy<String>] =
    &[name_from_heading, name_from_og_title, name_from_title];

pub const CATEGORY_STRATEGIES: &[Strategy<String>] = &[category_from_controls];

pub const PHONE_STRATEGIES: &[Strategy<String>] =
    &[phone_from_tel_link, phone_from_label, phone_from_main_text];

pub const ADDRESS_STRATEGIES: &[Strategy<String>] = &[address_from_label, address_from_main_text];

pub const WEBSITE_STRATEGIES: &[Strategy<String>] =
    &[website_from_control, website_from_anchors];

pub const REVIEW_STRATEGIES: &[Strategy<u32>] =
    &[reviews_from_aria_labels, reviews_from_main_text];

pub const COORDINATE_STRATEGIES: &[Strategy<Coordinates>] =
    &[coordinates_from_location, coordinates_from_preview_image];

fn name_from_heading(s: &ListingSnapshot) -> Option<String> {
    s.headings.first().cloned()
}

fn name_from_og_title(s: &ListingSnapshot) -> Option<String> {
    s.og_title.clone()
}

fn name_from_title(s: &ListingSnapshot) -> Option<String> {
    let title = s.title.trim();
    let name = title.split_once(" - ").map_or(title, |(head, _)| head).trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn category_from_controls(s: &ListingSnapshot) -> Option<String> {
    s.categories.first().cloned()
}

fn phone_from_tel_link(s: &ListingSnapshot) -> Option<String> {
    s.tel_hrefs.iter().find_map(|href| phone_from_tel_href(href))
}

fn phone_from_label(s: &ListingSnapshot) -> Option<String> {
    s.phone_labels.first().and_then(|label| find_phone(label))
}

fn phone_from_main_text(s: &ListingSnapshot) -> Option<String> {
    s.main_text.as_deref().and_then(find_phone)
}

fn address_from_label(s: &ListingSnapshot) -> Option<String> {
    s.address_labels.iter().find_map(|label| {
        let address = label.replace(ADDRESS_PREFIX, "");
        let address = address.trim();
        (!address.is_empty()).then(|| address.to_string())
    })
}

fn address_from_main_text(s: &ListingSnapshot) -> Option<String> {
    s.main_text.as_deref().and_then(address_line_from_text)
}

fn website_from_control(s: &ListingSnapshot) -> Option<String> {
    s.website_controls
        .iter()
        .map(|href| clean_href(href))
        .find(|href| !href.is_empty())
}

fn website_from_anchors(s: &ListingSnapshot) -> Option<String> {
    outbound_links(s)
        .into_iter()
        .find(|href| !is_social_url(href) && !is_blocked_website(href))
}

fn reviews_from_aria_labels(s: &ListingSnapshot) -> Option<u32> {
    s.aria_labels.iter().find_map(|label| parse_review_count(label))
}

fn reviews_from_main_text(s: &ListingSnapshot) -> Option<u32> {
    s.main_text.as_deref().and_then(parse_review_count)
}

fn coordinates_from_location(s: &ListingSnapshot) -> Option<Coordinates> {
    coordinates_from_url(&s.url)
}

fn coordinates_from_preview_image(s: &ListingSnapshot) -> Option<Coordinates> {
    s.og_image.as_deref().and_then(coordinates_from_static_map)
}

/// Cleaned, deduplicated anchor targets that lead off Maps, in document order.
fn outbound_links(s: &ListingSnapshot) -> Vec<String> {
    let mut seen = HashSet::new();
    s.anchors
        .iter()
        .map(|href| clean_href(href))
        .filter(|href| !href.is_empty() && seen.insert(href.clone()))
        .filter(|href| !is_wayfinding_link(href))
        .collect()
}

/// Social profile links in first-seen order, without duplicates.
#[must_use]
pub fn social_links(snapshot: &ListingSnapshot) -> Vec<String> {
    outbound_links(snapshot)
        .into_iter()
        .filter(|href| is_social_url(href))
        .collect()
}

/// Runs every field chain over `snapshot`.
#[must_use]
pub fn extract_details(snapshot: &ListingSnapshot) -> ListingDetails {
    let raw_address = resolve(snapshot, ADDRESS_STRATEGIES).unwrap_or_default();
    let (postal_code, address) = split_postal_code(&raw_address);

    ListingDetails {
        company_name: resolve(snapshot, NAME_STRATEGIES).unwrap_or_default(),
        category: resolve(snapshot, CATEGORY_STRATEGIES).unwrap_or_default(),
        phone: resolve(snapshot, PHONE_STRATEGIES).unwrap_or_default(),
        postal_code: postal_code.unwrap_or_default(),
        address,
        website_url: resolve(snapshot, WEBSITE_STRATEGIES).unwrap_or_default(),
        sns_urls: social_links(snapshot),
        review_count: resolve(snapshot, REVIEW_STRATEGIES).unwrap_or(0),
        coordinates: resolve(snapshot, COORDINATE_STRATEGIES),
        google_maps_url: snapshot.url.clone(),
    }
}

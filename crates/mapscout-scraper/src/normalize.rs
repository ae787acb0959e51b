//! Pure normalizers for raw listing text and links.
//!
//! Nothing here touches a browser; the detail strategies feed these
//! functions strings read from a [`crate::detail::ListingSnapshot`].

use std::sync::LazyLock;

use mapscout_core::Coordinates;
use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};
use url::Url;

/// Every dash-like code point that appears in Japanese addresses and
/// phone numbers (including the katakana prolonged sound mark).
static HYPHEN_VARIANTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\-\u{2010}\u{2011}\u{2012}\u{2013}\u{2014}\u{2015}\u{2212}\u{30FC}\u{FE63}\u{FF0D}]")
        .expect("valid regex")
});

/// Postal code with an optional leading `〒` marker. Group 1 is the code.
static POSTAL_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"〒?\s?([0-9]{3}-[0-9]{4})").expect("valid regex"));

/// Domestic phone number; applied to hyphen-normalized text.
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0[0-9]{1,4}-?[0-9]{1,4}-?[0-9]{3,4}").expect("valid regex"));

static REVIEW_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9][0-9,.]*)\s*件のクチコミ").expect("valid regex"));

static COORD_AT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/@([\-0-9.]+),([\-0-9.]+),").expect("valid regex"));

static COORD_3D4D: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!3d([\-0-9.]+)!4d([\-0-9.]+)").expect("valid regex"));

/// Longitude first, latitude second.
static COORD_2D3D: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!2d([\-0-9.]+)!3d([\-0-9.]+)").expect("valid regex"));

pub const SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "line.me",
    "lin.ee",
    "youtube.com",
    "tiktok.com",
    "ameblo.jp",
    "note.com",
    "threads.net",
    "pinterest.com",
    "linkedin.com",
];

/// Hosts that never count as a business's own website.
pub const BLOCKED_WEBSITE_HOSTS: &[&str] = &[
    "google.com",
    "google.co.jp",
    "maps.google.com",
    "maps.app.goo.gl",
    "goo.gl",
    "support.google.com",
];

/// Query parameters Maps appends for attribution and session tracking.
const TRACKING_PARAMS: &[&str] = &[
    "authuser", "entry", "g_ep", "ved", "rclk", "ei", "sa", "usg", "sca_esv",
];

const PLACE_PATH: &str = "/maps/place/";

const PREFECTURE_TERMS: &[char] = &['県', '府', '道', '都'];
const MUNICIPALITY_TERMS: &[char] = &['市', '区', '町', '村'];

/// Replaces every dash variant with an ASCII hyphen.
#[must_use]
pub fn normalize_hyphen(text: &str) -> String {
    HYPHEN_VARIANTS.replace_all(text, "-").into_owned()
}

/// Replaces full-width digits (`０`-`９`) with ASCII digits.
#[must_use]
pub fn normalize_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{FF10}'..='\u{FF19}' => char::from_digit(u32::from(c) - 0xFF10, 10).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Digits and dashes in the ASCII forms the field patterns expect.
fn normalize_numerals(text: &str) -> String {
    normalize_digits(&normalize_hyphen(text))
}

/// Splits a raw address into `(postal_code, address)`.
///
/// Digits and dashes are normalized first. The first postal code found is
/// returned, and every occurrence of it, with or without its `〒` marker, is
/// cut from the address before trimming.
#[must_use]
pub fn split_postal_code(raw: &str) -> (Option<String>, String) {
    let normalized = normalize_numerals(raw);
    let Some(code) = POSTAL_CODE
        .captures(&normalized)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
    else {
        return (None, normalized.trim().to_string());
    };
    let address = POSTAL_CODE.replace_all(&normalized, |caps: &Captures<'_>| {
        if caps[1] == *code {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    (Some(code), address.trim().to_string())
}

/// First phone number in `text`, with digits and dashes normalized.
#[must_use]
pub fn find_phone(text: &str) -> Option<String> {
    let normalized = normalize_numerals(text);
    PHONE.find(&normalized).map(|m| m.as_str().to_string())
}

/// The dial target of a `tel:` link, with digits and dashes normalized.
#[must_use]
pub fn phone_from_tel_href(href: &str) -> Option<String> {
    let target = href.trim().strip_prefix("tel:")?;
    let decoded = percent_decode_str(target).decode_utf8_lossy();
    let phone = normalize_numerals(decoded.trim());
    (!phone.is_empty()).then_some(phone)
}

/// Parses `"1,234件のクチコミ"` into `1234`. Separators are dropped.
#[must_use]
pub fn parse_review_count(text: &str) -> Option<u32> {
    let text = normalize_digits(text);
    let caps = REVIEW_COUNT.captures(&text)?;
    let digits: String = caps
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Coordinates encoded in a Maps URL.
///
/// Precedence: `/@lat,lon,` then `!3d{lat}!4d{lon}` then `!2d{lon}!3d{lat}`.
/// A pattern whose numbers fail to parse falls through to the next.
#[must_use]
pub fn coordinates_from_url(url: &str) -> Option<Coordinates> {
    let patterns: [(&Regex, bool); 3] =
        [(&*COORD_AT, false), (&*COORD_3D4D, false), (&*COORD_2D3D, true)];
    patterns.iter().find_map(|(re, swapped)| {
        let caps = re.captures(url)?;
        let a: f64 = caps.get(1)?.as_str().parse().ok()?;
        let b: f64 = caps.get(2)?.as_str().parse().ok()?;
        let (lat, lon) = if *swapped { (b, a) } else { (a, b) };
        valid_coordinates(lat, lon)
    })
}

/// Coordinates from the `center=lat,lon` parameter of a static-map image URL.
#[must_use]
pub fn coordinates_from_static_map(image_url: &str) -> Option<Coordinates> {
    let parsed = Url::parse(image_url).ok()?;
    let center = parsed
        .query_pairs()
        .find(|(key, _)| key == "center")
        .map(|(_, value)| value.into_owned())?;
    let (lat, lon) = center.split_once(',')?;
    valid_coordinates(lat.trim().parse().ok()?, lon.trim().parse().ok()?)
}

fn valid_coordinates(lat: f64, lon: f64) -> Option<Coordinates> {
    (lat.is_finite() && lon.is_finite()).then(|| Coordinates::new(lat, lon))
}

/// Unwraps Google `/url?q=` redirects and strips a trailing `&ved=` suffix.
#[must_use]
pub fn clean_href(href: &str) -> String {
    let href = href.trim();
    let mut target = href.to_string();
    if href.starts_with("https://www.google.com/url?")
        || href.starts_with("https://www.google.co.jp/url?")
    {
        if let Some(q) = Url::parse(href).ok().and_then(|u| {
            u.query_pairs()
                .find(|(key, _)| key == "q")
                .map(|(_, value)| value.into_owned())
        }) {
            if !q.is_empty() {
                target = q;
            }
        }
    }
    match target.find("&ved=") {
        Some(idx) => target[..idx].to_string(),
        None => target,
    }
}

fn host_of(href: &str) -> Option<String> {
    Url::parse(href)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Whether `href` points at a known social profile host.
#[must_use]
pub fn is_social_url(href: &str) -> bool {
    host_of(href).is_some_and(|host| SOCIAL_DOMAINS.iter().any(|d| host_matches(&host, d)))
}

/// Whether `href` must never be taken as a website. Unparseable links are
/// blocked.
#[must_use]
pub fn is_blocked_website(href: &str) -> bool {
    host_of(href).is_none_or(|host| BLOCKED_WEBSITE_HOSTS.iter().any(|d| host_matches(&host, d)))
}

/// Links that lead back into Maps or are not web pages at all.
#[must_use]
pub fn is_wayfinding_link(href: &str) -> bool {
    let low = href.to_ascii_lowercase();
    low.starts_with("tel:")
        || low.starts_with("mailto:")
        || low.starts_with("javascript:")
        || low.contains("/maps/dir")
        || low.contains("/maps/reserve")
        || (low.contains(PLACE_PATH) && low.contains("google."))
}

#[must_use]
pub fn is_place_url(href: &str) -> bool {
    href.contains(PLACE_PATH)
}

/// Canonical form of a listing reference, or `None` if `href` is not a
/// place URL.
///
/// The fragment and tracking parameters are dropped so the same listing
/// reached from different cards compares equal.
#[must_use]
pub fn canonical_reference(href: &str) -> Option<String> {
    let href = href.trim();
    if !is_place_url(href) {
        return None;
    }
    let Ok(mut url) = Url::parse(href) else {
        return Some(href.to_string());
    };
    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.to_string())
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Picks the address line out of free-form listing text: the first line
/// with a `〒` marker, else the longest line naming both a prefecture-level
/// and a municipality-level unit.
#[must_use]
pub fn address_line_from_text(text: &str) -> Option<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if let Some(line) = lines.iter().find(|l| l.contains('〒')) {
        return Some((*line).to_string());
    }
    lines
        .iter()
        .filter(|l| l.contains(PREFECTURE_TERMS) && l.contains(MUNICIPALITY_TERMS))
        .rev()
        .max_by_key(|l| l.chars().count())
        .map(|l| (*l).to_string())
}

/// Search URL for `phrase` under `base` (e.g. `https://www.google.co.jp/maps`).
#[must_use]
pub fn search_url(base: &str, phrase: &str, language: &str) -> String {
    let query: String = url::form_urlencoded::byte_serialize(phrase.as_bytes()).collect();
    format!(
        "{}/search/?api=1&query={query}&hl={language}",
        base.trim_end_matches('/')
    )
}

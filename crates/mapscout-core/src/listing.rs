//! Listing domain types shared by the scraper pipeline and the CLI.

use serde::{Deserialize, Serialize};

/// Separator between area and keyword in the search phrase (U+3000).
const PHRASE_SEPARATOR: char = '\u{3000}';

/// One (area, keyword) search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub area: String,
    pub keyword: String,
}

impl Query {
    #[must_use]
    pub fn new(area: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            area: area.into(),
            keyword: keyword.into(),
        }
    }

    /// The phrase typed into the map search box, e.g. `"渋谷区　美容室"`.
    #[must_use]
    pub fn search_phrase(&self) -> String {
        format!("{}{PHRASE_SEPARATOR}{}", self.area, self.keyword)
    }
}

/// A latitude/longitude pair, rounded to 6 decimal digits on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: round6(latitude),
            longitude: round6(longitude),
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Fields extracted from one loaded listing view, before the originating
/// query is attached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDetails {
    pub company_name: String,
    pub category: String,
    pub phone: String,
    pub postal_code: String,
    pub address: String,
    pub website_url: String,
    /// Social profile links in first-seen order, without duplicates.
    pub sns_urls: Vec<String>,
    pub review_count: u32,
    pub coordinates: Option<Coordinates>,
    /// Location of the listing view at extraction time.
    pub google_maps_url: String,
}

/// The emitted record for one listing.
///
/// `latitude` and `longitude` are always both set or both `None`; build
/// records through [`ListingRecord::from_details`] to keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub company_name: String,
    pub category: String,
    pub phone: String,
    pub postal_code: String,
    pub address: String,
    pub website_url: String,
    /// Space-joined social profile links.
    pub sns_urls: String,
    pub review_count: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub google_maps_url: String,
    pub area: String,
    pub industry: String,
}

impl ListingRecord {
    /// Stamps `details` with the originating query.
    ///
    /// Returns `None` when the listing has no name; such listings are never
    /// emitted.
    #[must_use]
    pub fn from_details(details: ListingDetails, query: &Query) -> Option<Self> {
        let company_name = details.company_name.trim().to_string();
        if company_name.is_empty() {
            return None;
        }

        let (latitude, longitude) = details
            .coordinates
            .map_or((None, None), |c| (Some(c.latitude), Some(c.longitude)));

        Some(Self {
            company_name,
            category: details.category,
            phone: details.phone,
            postal_code: details.postal_code,
            address: details.address,
            website_url: details.website_url,
            sns_urls: details.sns_urls.join(" "),
            review_count: details.review_count,
            latitude,
            longitude,
            google_maps_url: details.google_maps_url,
            area: query.area.clone(),
            industry: query.keyword.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(name: &str) -> ListingDetails {
        ListingDetails {
            company_name: name.to_string(),
            category: "美容院".to_string(),
            phone: "03-1234-5678".to_string(),
            postal_code: "150-0001".to_string(),
            address: "東京都渋谷区神宮前1-2-3".to_string(),
            website_url: "https://salon.example.jp/".to_string(),
            sns_urls: vec![
                "https://www.instagram.com/salon".to_string(),
                "https://lin.ee/abc".to_string(),
            ],
            review_count: 42,
            coordinates: Some(Coordinates::new(35.668_123_4, 139.708_765_4)),
            google_maps_url: "https://www.google.co.jp/maps/place/x".to_string(),
        }
    }

    #[test]
    fn search_phrase_joins_with_ideographic_space() {
        let q = Query::new("渋谷区", "美容室");
        assert_eq!(q.search_phrase(), "渋谷区\u{3000}美容室");
    }

    #[test]
    fn coordinates_round_to_six_digits() {
        let c = Coordinates::new(35.681_236_789, 139.767_125_111);
        assert!((c.latitude - 35.681_237).abs() < 1e-9);
        assert!((c.longitude - 139.767_125).abs() < 1e-9);
    }

    #[test]
    fn from_details_stamps_query_and_joins_socials() {
        let q = Query::new("渋谷区", "美容室");
        let record = ListingRecord::from_details(details("Salon A"), &q).unwrap();
        assert_eq!(record.area, "渋谷区");
        assert_eq!(record.industry, "美容室");
        assert_eq!(
            record.sns_urls,
            "https://www.instagram.com/salon https://lin.ee/abc"
        );
        assert_eq!(record.review_count, 42);
        assert!(record.latitude.is_some() && record.longitude.is_some());
    }

    #[test]
    fn from_details_discards_blank_name() {
        let q = Query::new("渋谷区", "美容室");
        assert!(ListingRecord::from_details(details("   "), &q).is_none());
        assert!(ListingRecord::from_details(details(""), &q).is_none());
    }

    #[test]
    fn missing_coordinates_leave_both_fields_null() {
        let q = Query::new("渋谷区", "美容室");
        let mut d = details("Salon B");
        d.coordinates = None;
        let record = ListingRecord::from_details(d, &q).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["latitude"].is_null());
        assert!(json["longitude"].is_null());
        assert_eq!(json["review_count"], 42);
    }
}

use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for a scrape run, resolved from the environment.
///
/// Timing fields mirror the pipeline's wait policies one-to-one so a slow
/// network can be accommodated without a rebuild.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: String,
    /// Explicit Chrome/Chromium binary; auto-detected when `None`.
    pub chrome_path: Option<PathBuf>,
    /// Maps origin used to build search URLs, without a trailing slash.
    pub maps_base_url: String,
    /// Interface language passed as `hl=` and `--lang=`.
    pub language: String,
    pub listing_timeout_secs: u64,
    pub consent_timeout_secs: u64,
    pub feed_timeout_secs: u64,
    pub search_settle_ms: u64,
    pub scroll_settle_ms: u64,
    pub scroll_stagnation_threshold: u32,
    pub scroll_max_iterations: u32,
    /// Number of browser sessions consuming the reference queue.
    pub workers: usize,
}

impl AppConfig {
    #[must_use]
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    #[must_use]
    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_secs)
    }

    #[must_use]
    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    #[must_use]
    pub fn search_settle(&self) -> Duration {
        Duration::from_millis(self.search_settle_ms)
    }

    #[must_use]
    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            chrome_path: None,
            maps_base_url: "https://www.google.co.jp/maps".to_string(),
            language: "ja".to_string(),
            listing_timeout_secs: 30,
            consent_timeout_secs: 8,
            feed_timeout_secs: 8,
            search_settle_ms: 3000,
            scroll_settle_ms: 1400,
            scroll_stagnation_threshold: 5,
            scroll_max_iterations: 80,
            workers: 1,
        }
    }
}

use std::path::PathBuf;
use std::str::FromStr;

use crate::app_config::AppConfig;
use crate::ConfigError;

/// Load scrape configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a variable is present but cannot be parsed.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load scrape configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files; useful for testing
/// or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if a variable is present but cannot be parsed.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build configuration using the provided env-var lookup function.
///
/// Every variable is optional; defaults come from [`AppConfig::default`].
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let defaults = AppConfig::default();

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let log_level = or_default("MAPSCOUT_LOG_LEVEL", &defaults.log_level);
    let chrome_path = lookup("MAPSCOUT_CHROME_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);

    let maps_base_url = or_default("MAPSCOUT_MAPS_BASE_URL", &defaults.maps_base_url)
        .trim_end_matches('/')
        .to_string();
    if !(maps_base_url.starts_with("https://") || maps_base_url.starts_with("http://")) {
        return Err(ConfigError::InvalidEnvVar {
            var: "MAPSCOUT_MAPS_BASE_URL".to_string(),
            reason: format!("expected an http(s) URL, got \"{maps_base_url}\""),
        });
    }

    let language = or_default("MAPSCOUT_LANGUAGE", &defaults.language);

    let listing_timeout_secs =
        parse_or(&lookup, "MAPSCOUT_LISTING_TIMEOUT_SECS", defaults.listing_timeout_secs)?;
    let consent_timeout_secs =
        parse_or(&lookup, "MAPSCOUT_CONSENT_TIMEOUT_SECS", defaults.consent_timeout_secs)?;
    let feed_timeout_secs =
        parse_or(&lookup, "MAPSCOUT_FEED_TIMEOUT_SECS", defaults.feed_timeout_secs)?;
    let search_settle_ms =
        parse_or(&lookup, "MAPSCOUT_SEARCH_SETTLE_MS", defaults.search_settle_ms)?;
    let scroll_settle_ms =
        parse_or(&lookup, "MAPSCOUT_SCROLL_SETTLE_MS", defaults.scroll_settle_ms)?;
    let scroll_stagnation_threshold = parse_or(
        &lookup,
        "MAPSCOUT_SCROLL_STAGNATION_THRESHOLD",
        defaults.scroll_stagnation_threshold,
    )?;
    let scroll_max_iterations =
        parse_or(&lookup, "MAPSCOUT_SCROLL_MAX_ITERATIONS", defaults.scroll_max_iterations)?;
    let workers: usize = parse_or(&lookup, "MAPSCOUT_WORKERS", defaults.workers)?;

    if workers == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "MAPSCOUT_WORKERS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    Ok(AppConfig {
        log_level,
        chrome_path,
        maps_base_url,
        language,
        listing_timeout_secs,
        consent_timeout_secs,
        feed_timeout_secs,
        search_settle_ms,
        scroll_settle_ms,
        scroll_stagnation_threshold,
        scroll_max_iterations,
        workers,
    })
}

/// Parse `var` when present, otherwise return `default`.
fn parse_or<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

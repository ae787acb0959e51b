//! The scrape command: browser startup, the pipeline run, and shutdown.

use anyhow::Context;
use mapscout_core::{AppConfig, ListingRecord, Query};
use mapscout_scraper::{ChromiumBrowser, LaunchOptions, Orchestrator, PipelineConfig};

use crate::Cli;

/// Parses the `--cities` value: a JSON array of strings, or a
/// comma-separated list when the value is not JSON. Blank entries are
/// dropped.
///
/// # Errors
///
/// Returns an error if the value looks like a JSON array but does not
/// parse, or if no area remains.
pub(crate) fn parse_cities(raw: &str) -> anyhow::Result<Vec<String>> {
    let raw = raw.trim();
    let cities: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw).context("--cities is not a JSON array of strings")?
    } else {
        raw.split(',').map(str::to_string).collect()
    };

    let cities: Vec<String> = cities
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    anyhow::ensure!(!cities.is_empty(), "--cities names no area");
    Ok(cities)
}

pub(crate) fn build_queries(keyword: &str, cities: &[String]) -> Vec<Query> {
    cities
        .iter()
        .map(|city| Query::new(city.as_str(), keyword))
        .collect()
}

/// Launches the browser, runs every query, and shuts the browser down.
///
/// # Errors
///
/// Returns an error if the arguments are invalid, the browser cannot be
/// started, or a browser session is lost mid-run.
pub(crate) async fn run(cli: &Cli, mut config: AppConfig) -> anyhow::Result<Vec<ListingRecord>> {
    let keyword = cli.keyword.trim();
    anyhow::ensure!(!keyword.is_empty(), "--keyword must not be empty");
    let queries = build_queries(keyword, &parse_cities(&cli.cities)?);
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }

    let launch = LaunchOptions {
        chrome_path: config.chrome_path.clone(),
        headless: cli.headless,
        language: config.language.clone(),
        ..LaunchOptions::default()
    };
    let pipeline = PipelineConfig::from_app_config(&config, cli.max_pages);

    let browser = ChromiumBrowser::launch(&launch)
        .await
        .context("failed to start the browser")?;

    let mut sessions = Vec::with_capacity(pipeline.workers);
    for _ in 0..pipeline.workers {
        sessions.push(
            browser
                .session()
                .await
                .context("failed to open a browser session")?,
        );
    }

    tracing::info!(
        keyword,
        areas = queries.len(),
        max_pages = cli.max_pages,
        workers = pipeline.workers,
        "starting scrape"
    );
    let mut orchestrator = Orchestrator::with_sessions(pipeline, sessions)?;
    let outcome = orchestrator.run(&queries).await;

    drop(orchestrator.into_sessions());
    if let Err(e) = browser.shutdown().await {
        tracing::warn!(error = %e, "browser shutdown failed");
    }

    Ok(outcome?)
}

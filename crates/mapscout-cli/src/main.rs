use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod output;
mod scrape;

#[derive(Debug, Parser)]
#[command(name = "mapscout")]
#[command(about = "Collect business listings from Google Maps searches")]
struct Cli {
    /// Business keyword searched in every area, e.g. "美容院".
    #[arg(long)]
    keyword: String,

    /// Areas to search: a JSON array (`["渋谷区","新宿区"]`) or a
    /// comma-separated list.
    #[arg(long)]
    cities: String,

    /// Results pages to walk per area.
    #[arg(long, default_value_t = 5)]
    max_pages: u32,

    /// Run Chrome without a window.
    #[arg(long)]
    headless: bool,

    /// Concurrent listing extractions; overrides `MAPSCOUT_WORKERS`.
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match mapscout_core::load_app_config() {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&anyhow::Error::new(e).context("invalid configuration"));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.log_level) {
        output::print_error(&e);
        return ExitCode::FAILURE;
    }

    match scrape::run(&cli, config).await {
        Ok(records) => match output::print_records(&records) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "failed to write results");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "scrape failed");
            output::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Diagnostics go to stderr; stdout is reserved for the JSON result.
fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

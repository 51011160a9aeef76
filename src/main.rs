//! # Feed Swarm
//!
//! Discovers today's articles from RSS/Atom feeds, renders each one in a
//! pool of headless Chrome tabs, extracts title, body, date and author, and
//! merges the results into a deduplicated JSON collection and a CSV table.
//!
//! ## Usage
//!
//! ```sh
//! feed_swarm --config swarm.yaml
//! feed_swarm --daily            # run now, then every day at the configured UTC time
//! ```
//!
//! ## Architecture
//!
//! 1. **Discovery**: fetch every feed, keep items published today, dedup, cap
//! 2. **Dispatch**: split URLs into batches of `pool_width` tabs, pausing between batches
//! 3. **Fetch**: per URL, navigate with a timeout, strip overlays, extract, retry on failure
//! 4. **Persist**: append unseen URLs to the JSON collection and the CSV table

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod browser;
mod cli;
mod config;
mod dispatcher;
mod extract;
mod feeds;
mod models;
mod outputs;
mod pipeline;
mod schedule;
mod utils;
mod worker;

use cli::Cli;
use config::ScrapeConfig;
use utils::ensure_parent_writable;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("feed_swarm starting up");

    let args = Cli::parse();
    debug!(?args.config, daily = args.daily, "Parsed CLI arguments");

    let mut config = ScrapeConfig::load(args.config.as_deref()).await?;
    args.apply(&mut config);
    config.validate()?;
    info!(
        feeds = config.feeds.len(),
        pool_width = config.pool_width,
        max_attempts = config.max_attempts,
        "Configuration ready"
    );

    // Early check: both sinks must be writable before any browser work
    for path in [&config.output.json_path, &config.output.csv_path] {
        if let Err(e) = ensure_parent_writable(path).await {
            error!(
                path = %path.display(),
                error = %e,
                "Output location is not writable (fix perms or choose a different path)"
            );
            return Err(e.into());
        }
    }

    if args.daily {
        schedule::run_daily(&config).await;
    } else if !schedule::run_and_log(&config).await {
        return Err("scrape run failed".into());
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

//! Run orchestration: discovery, dispatch, then persistence, once per invocation.
//!
//! Retries live in the fetch worker and partial failures are absorbed by the
//! feed and dispatch stages, so a run only fails when the browser pool
//! cannot be created or the results cannot be stored.

use crate::browser::chrome::{ChromeBrowser, LaunchSettings};
use crate::browser::{SessionError, SessionFactory};
use crate::config::{ConfigError, ScrapeConfig};
use crate::dispatcher::{self, DispatchSettings};
use crate::extract::Extractor;
use crate::feeds::{DayWindow, FeedError, FeedFetcher, HttpFeedFetcher, discover};
use crate::models::{FetchRecord, RunReport};
use crate::outputs::{Store, StoreError};
use chrono::{DateTime, Offset, Utc};
use std::future::Future;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, instrument};

/// Run-level failures.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build feed client: {0}")]
    FeedClient(#[from] FeedError),
    #[error("browser session pool unavailable: {0}")]
    SessionPool(#[from] SessionError),
    #[error("failed to persist results: {0}")]
    Store(#[from] StoreError),
}

/// Run the whole pipeline once against live feeds and a real Chrome.
///
/// # Arguments
///
/// * `config` - Validated run configuration; selectors, feeds, pool and outputs
///
/// # Returns
///
/// A [`RunReport`] with the discovered, scraped, stored and appended counts.
///
/// # Errors
///
/// Returns [`RunError`] when the config is invalid, the browser or a session
/// pool cannot be created, or the results cannot be persisted. Feed and
/// per-URL failures are logged and never fail the run.
pub async fn run_once(config: &ScrapeConfig) -> Result<RunReport, RunError> {
    config.validate()?;
    let extractor = Extractor::from_config(&config.selectors)?;
    let launch = LaunchSettings::from_config(config);
    let fetcher = HttpFeedFetcher::new(&launch.user_agent, config.timings.feed_timeout())?;
    let store = Store::from_config(&config.output);

    run_with(
        config,
        &extractor,
        &fetcher,
        || ChromeBrowser::launch(&launch),
        &store,
        Utc::now(),
    )
    .await
}

/// Pipeline core with every collaborator supplied by the caller.
///
/// `launch` is only invoked when discovery produced at least one URL.
#[instrument(level = "info", skip_all, fields(feeds = config.feeds.len()))]
pub async fn run_with<Fe, F, L, Fut>(
    config: &ScrapeConfig,
    extractor: &Extractor,
    fetcher: &Fe,
    launch: L,
    store: &Store,
    now: DateTime<Utc>,
) -> Result<RunReport, RunError>
where
    Fe: FeedFetcher,
    F: SessionFactory,
    L: FnOnce() -> Fut,
    Fut: Future<Output = Result<F, SessionError>>,
{
    let t0 = Instant::now();
    let offset = config.reference_offset().unwrap_or_else(|| Utc.fix());
    let window = DayWindow::containing(now, offset);

    let urls = discover(
        fetcher,
        &config.feeds,
        config.per_feed_limit,
        config.global_limit,
        &window,
    )
    .await;

    let mut report = RunReport {
        discovered: urls.len(),
        ..RunReport::default()
    };
    if urls.is_empty() {
        info!("No fresh articles discovered; nothing to scrape");
        return Ok(report);
    }

    let browser = launch().await.map_err(|e| {
        error!(error = %e, "Could not start browser");
        RunError::SessionPool(e)
    })?;
    let settings = DispatchSettings::from_config(config);
    let dispatched = dispatcher::run(&browser, &urls, extractor, &settings).await;
    browser.shutdown().await;
    let records = match dispatched {
        Ok(records) => records,
        Err(aborted) => {
            store_partial(store, &aborted.records).await;
            return Err(RunError::SessionPool(aborted.source));
        }
    };

    report.scraped = records.len();
    if records.is_empty() {
        info!(discovered = report.discovered, "No articles scraped; skipping persistence");
        return Ok(report);
    }

    let outcome = store.merge(&records).await?;
    report.stored = outcome.stored;
    report.tabular_appended = outcome.tabular_appended;

    let elapsed = t0.elapsed();
    info!(
        discovered = report.discovered,
        count = report.scraped,
        stored = report.stored,
        tabular_appended = report.tabular_appended,
        secs = elapsed.as_secs(),
        "Swarm scrape complete"
    );
    Ok(report)
}

/// Keep what earlier batches scraped when the session pool fails mid-run.
/// The pool failure stays the run's error, so a store failure here is only logged.
async fn store_partial(store: &Store, records: &[FetchRecord]) {
    if records.is_empty() {
        return;
    }
    match store.merge(records).await {
        Ok(outcome) => info!(
            stored = outcome.stored,
            tabular_appended = outcome.tabular_appended,
            "Stored records scraped before the session pool failed"
        ),
        Err(e) => error!(error = %e, "Failed to store records scraped before the session pool failed"),
    }
}

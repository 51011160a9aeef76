//! Batch dispatcher: run fetch workers over candidate URLs with a bounded tab pool.
//!
//! URLs are split into contiguous batches of `pool_width`. For every batch the
//! dispatcher opens exactly `pool_width` sessions, hands URL *i* to session
//! `i % pool_width`, and drives all workers concurrently (at most
//! `pool_width` at once). The batch ends with a join barrier: every worker
//! finishes and every session is released before the next batch opens its
//! pool. A fixed pause separates consecutive batches.
//!
//! Worker failures are dropped from the results. The only error surfaced is
//! a session pool that cannot be opened; it stops dispatch and carries the
//! records scraped by earlier batches so they can still be stored.

use crate::browser::{SessionError, SessionFactory};
use crate::config::ScrapeConfig;
use crate::extract::Extractor;
use crate::models::FetchRecord;
use crate::worker::{FetchPolicy, fetch_record};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, instrument};

/// Pool size, throttle and per-URL policy for a dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub pool_width: usize,
    pub batch_pause: Duration,
    pub fetch: FetchPolicy,
}

impl DispatchSettings {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            pool_width: config.pool_width.max(1),
            batch_pause: config.timings.batch_pause(),
            fetch: FetchPolicy::from_config(config),
        }
    }
}

/// Dispatch stopped because a batch could not open its session pool.
#[derive(Debug, Error)]
#[error("session pool failed with {} records already scraped: {source}", .records.len())]
pub struct DispatchAborted {
    /// Records from the batches that completed before the failure.
    pub records: Vec<FetchRecord>,
    #[source]
    pub source: SessionError,
}

/// Scrape `urls` batch by batch and return every successful record.
///
/// # Arguments
///
/// * `factory` - Source of browser sessions; one full pool is opened per batch
/// * `urls` - Candidate URLs, scraped in contiguous batches of `settings.pool_width`
/// * `extractor` - Compiled selectors and neutralization script
/// * `settings` - Pool width, inter-batch pause and per-URL fetch policy
///
/// # Returns
///
/// The records of every URL that was scraped, in no particular order. URLs that
/// exhausted their attempts are left out.
///
/// # Errors
///
/// Returns [`DispatchAborted`] when a batch cannot open its session pool. No
/// further batches run.
#[instrument(level = "info", skip_all, fields(urls = urls.len(), pool_width = settings.pool_width))]
pub async fn run<F: SessionFactory>(
    factory: &F,
    urls: &[String],
    extractor: &Extractor,
    settings: &DispatchSettings,
) -> Result<Vec<FetchRecord>, DispatchAborted> {
    let width = settings.pool_width.max(1);
    let total_batches = urls.len().div_ceil(width);
    let mut records = Vec::with_capacity(urls.len());

    for (index, batch) in urls.chunks(width).enumerate() {
        if index > 0 {
            sleep(settings.batch_pause).await;
        }
        info!(
            batch = index + 1,
            total = total_batches,
            size = batch.len(),
            "Scraping batch"
        );

        let sessions = match open_pool(factory, width).await {
            Ok(sessions) => sessions,
            Err(source) => return Err(DispatchAborted { records, source }),
        };

        let results: Vec<Option<FetchRecord>> = stream::iter(batch.iter().enumerate())
            .map(|(i, url)| fetch_record(&sessions[i % width], url, extractor, &settings.fetch))
            .buffer_unordered(width)
            .collect()
            .await;

        join_all(sessions.into_iter().map(|s| factory.release(s))).await;

        let before = records.len();
        records.extend(results.into_iter().flatten());
        info!(
            batch = index + 1,
            scraped = records.len() - before,
            failed = batch.len() - (records.len() - before),
            "Batch complete"
        );
    }

    info!(count = records.len(), "Dispatch complete");
    Ok(records)
}

/// Open `width` sessions, releasing any already opened if one fails.
async fn open_pool<F: SessionFactory>(
    factory: &F,
    width: usize,
) -> Result<Vec<F::Session>, SessionError> {
    let mut sessions = Vec::with_capacity(width);
    for _ in 0..width {
        match factory.open().await {
            Ok(session) => sessions.push(session),
            Err(e) => {
                error!(opened = sessions.len(), wanted = width, error = %e, "Failed to open session pool");
                join_all(sessions.into_iter().map(|s| factory.release(s))).await;
                return Err(e);
            }
        }
    }
    Ok(sessions)
}

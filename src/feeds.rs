//! Feed discovery: turn a list of RSS/Atom sources into candidate article URLs.
//!
//! Discovery runs feed by feed in configured order:
//!
//! 1. Fetch the feed through a [`FeedFetcher`] and parse it (RSS first, then Atom)
//! 2. Keep items published inside the current [`DayWindow`]
//! 3. Cap each feed at `per_feed_limit`, preserving feed order
//! 4. Concatenate, drop repeated URLs (first occurrence wins), cap at `global_limit`
//!
//! A feed that cannot be fetched or parsed is logged and skipped; it never
//! fails the run.

use crate::models::FeedEntry;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use itertools::Itertools;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Errors for a single feed source.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("feed returned HTTP {status}")]
    Status { status: u16 },
    #[error("content is neither RSS nor Atom: {0}")]
    Parse(String),
}

/// Capability for reading raw feed bytes.
pub trait FeedFetcher {
    /// Download the feed document at `url`.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FeedError>;
}

/// [`FeedFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new(user_agent: &str, timeout: std::time::Duration) -> Result<Self, FeedError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl FeedFetcher for HttpFeedFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FeedError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Half-open interval `[start, end)` covering one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DayWindow {
    /// The calendar day containing `now`, as seen from `offset`.
    pub fn containing(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local_date = now.with_timezone(&offset).date_naive();
        // Fixed offsets have no gaps, so local midnight always exists.
        let start = offset
            .from_local_datetime(&local_date.and_time(chrono::NaiveTime::MIN))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn contains(&self, at: &DateTime<FixedOffset>) -> bool {
        let at = at.with_timezone(&Utc);
        self.start <= at && at < self.end
    }
}

/// Parse a feed document, trying RSS 2.0 before Atom.
pub fn parse_feed(content: &[u8]) -> Result<Vec<FeedEntry>, FeedError> {
    if let Ok(channel) = rss::Channel::read_from(content) {
        return Ok(channel.items().iter().map(rss_entry).collect());
    }

    match atom_syndication::Feed::read_from(content) {
        Ok(feed) => Ok(feed.entries().iter().map(atom_entry).collect()),
        Err(e) => Err(FeedError::Parse(e.to_string())),
    }
}

fn rss_entry(item: &rss::Item) -> FeedEntry {
    let published = item.pub_date().and_then(|raw| {
        DateTime::parse_from_rfc2822(raw.trim())
            .or_else(|_| DateTime::parse_from_rfc3339(raw.trim()))
            .ok()
    });

    FeedEntry {
        title: item.title().map(String::from),
        link: item.link().map(|l| l.trim().to_string()),
        published,
    }
}

fn atom_entry(entry: &atom_syndication::Entry) -> FeedEntry {
    let link = entry
        .links()
        .iter()
        .find(|l| l.rel() == "alternate")
        .or_else(|| entry.links().first())
        .map(|l| l.href().trim().to_string());

    FeedEntry {
        title: Some(entry.title().to_string()),
        link,
        published: Some(*entry.published().unwrap_or(entry.updated())),
    }
}

/// Links of same-day entries, in feed order, capped at `limit`.
pub fn select_fresh(entries: &[FeedEntry], window: &DayWindow, limit: usize) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.published.as_ref().is_some_and(|p| window.contains(p)))
        .filter_map(|e| {
            let link = e.link.clone().filter(|l| !l.is_empty())?;
            debug!(title = e.title.as_deref().unwrap_or("-"), link = %link, "Fresh item");
            Some(link)
        })
        .take(limit)
        .collect()
}

/// Discover candidate article URLs from `feeds`.
///
/// # Arguments
///
/// * `fetcher` - Reads raw feed documents
/// * `feeds` - Feed URLs, processed in this order
/// * `per_feed_limit` - Maximum same-day items kept from each feed
/// * `global_limit` - Maximum URLs returned overall
/// * `window` - The calendar day an item must be published in
///
/// # Returns
///
/// Unique article URLs in feed order, first occurrence kept. Feeds that fail
/// to download or parse contribute nothing; the error is logged.
#[instrument(level = "info", skip_all, fields(feeds = feeds.len(), per_feed_limit = per_feed_limit, global_limit = global_limit))]
pub async fn discover<F: FeedFetcher>(
    fetcher: &F,
    feeds: &[Url],
    per_feed_limit: usize,
    global_limit: usize,
    window: &DayWindow,
) -> Vec<String> {
    let mut collected = Vec::new();

    for feed_url in feeds {
        let entries = match fetcher.fetch(feed_url).await {
            Ok(bytes) => parse_feed(&bytes),
            Err(e) => Err(e),
        };

        match entries {
            Ok(entries) => {
                let fresh = select_fresh(&entries, window, per_feed_limit);
                info!(
                    feed = %feed_url,
                    items = entries.len(),
                    fresh = fresh.len(),
                    "Fetched feed"
                );
                collected.extend(fresh);
            }
            Err(e) => {
                warn!(feed = %feed_url, error = %e, "Skipping feed");
            }
        }
    }

    let urls: Vec<String> = collected.into_iter().unique().take(global_limit).collect();
    info!(count = urls.len(), "Discovered candidate URLs");
    debug!(urls = ?urls, "Candidate URLs");
    urls
}

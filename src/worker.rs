//! Fetch worker: turn one article URL into a [`FetchRecord`] using a browser session.
//!
//! Each attempt walks the same steps:
//!
//! 1. **Navigate**, bounded by the navigation timeout
//! 2. **Neutralize** restriction overlays (best effort)
//! 3. **Settle** for a fixed interval so deferred rendering can finish
//! 4. **Extract** fields from the rendered HTML
//!
//! Navigation, timeout and content-read failures are retried after a fixed
//! backoff until `max_attempts` is reached. The worker never returns an
//! error; an exhausted URL simply yields `None`.

use crate::browser::{BrowserSession, SessionError};
use crate::config::ScrapeConfig;
use crate::extract::Extractor;
use crate::models::FetchRecord;
use crate::utils::truncate_for_log;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

/// Attempt budget and waits for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub navigation_timeout: Duration,
    /// Heuristic pause after neutralization; not a completion guarantee.
    pub settle: Duration,
    pub retry_backoff: Duration,
}

impl FetchPolicy {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            navigation_timeout: config.timings.navigation_timeout(),
            settle: config.timings.settle(),
            retry_backoff: config.timings.retry_backoff(),
        }
    }
}

/// Fetch and extract `url`, retrying per `policy`.
///
/// # Arguments
///
/// * `session` - Browser tab to navigate; reused as-is, never reset between URLs
/// * `url` - Article URL, also used as the record key
/// * `extractor` - Field selectors and the neutralization script
/// * `policy` - Attempt budget, navigation timeout, settle wait and backoff
///
/// # Returns
///
/// `Some(record)` from the first successful attempt, or `None` once
/// `policy.max_attempts` attempts have failed. Missing fields never fail an
/// attempt; they carry placeholders instead.
#[instrument(level = "info", skip_all, fields(%url))]
pub async fn fetch_record<S: BrowserSession>(
    session: &S,
    url: &str,
    extractor: &Extractor,
    policy: &FetchPolicy,
) -> Option<FetchRecord> {
    let total_t0 = Instant::now();

    for attempt in 1..=policy.max_attempts {
        let attempt_t0 = Instant::now();
        match attempt_once(session, url, extractor, policy).await {
            Ok(record) => {
                info!(
                    attempt,
                    elapsed_ms = attempt_t0.elapsed().as_millis() as u64,
                    title = %truncate_for_log(&record.title, 80),
                    "Scraped article"
                );
                return Some(record);
            }
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    attempt,
                    max = policy.max_attempts,
                    elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                    delay = ?policy.retry_backoff,
                    error = %e,
                    "Attempt failed; backing off"
                );
                sleep(policy.retry_backoff).await;
            }
            Err(e) => {
                error!(
                    attempt,
                    max = policy.max_attempts,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    error = %e,
                    "Giving up on URL"
                );
            }
        }
    }
    None
}

async fn attempt_once<S: BrowserSession>(
    session: &S,
    url: &str,
    extractor: &Extractor,
    policy: &FetchPolicy,
) -> Result<FetchRecord, SessionError> {
    // The session applies its own bound too; this one holds for any implementation.
    timeout(
        policy.navigation_timeout,
        session.navigate(url, policy.navigation_timeout),
    )
    .await
    .map_err(|_| SessionError::Timeout(policy.navigation_timeout))??;

    if let Err(e) = session.evaluate(extractor.neutralize_script()).await {
        debug!(error = %e, "Overlay neutralization failed; extracting anyway");
    }

    sleep(policy.settle).await;

    let html = session.content().await?;
    Ok(extractor.extract(url, &html))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorConfig;
    use crate::models::MISSING_TITLE;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Session whose navigations fail until `fail_first` attempts have been made.
    struct ScriptedSession {
        fail_first: u32,
        hang: bool,
        html: String,
        navigations: AtomicU32,
        scripts: RefCell<Vec<String>>,
    }

    impl ScriptedSession {
        fn new(fail_first: u32, html: &str) -> Self {
            Self {
                fail_first,
                hang: false,
                html: html.to_string(),
                navigations: AtomicU32::new(0),
                scripts: RefCell::new(Vec::new()),
            }
        }
    }

    impl BrowserSession for ScriptedSession {
        async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), SessionError> {
            let n = self.navigations.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hang {
                std::future::pending::<()>().await;
            }
            if n <= self.fail_first {
                return Err(SessionError::Navigation(format!("refused {url}")));
            }
            Ok(())
        }

        async fn evaluate(&self, script: &str) -> Result<(), SessionError> {
            self.scripts.borrow_mut().push(script.to_string());
            Ok(())
        }

        async fn content(&self) -> Result<String, SessionError> {
            Ok(self.html.clone())
        }
    }

    fn policy(max_attempts: u32) -> FetchPolicy {
        FetchPolicy {
            max_attempts,
            navigation_timeout: Duration::from_secs(60),
            settle: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(3),
        }
    }

    fn extractor() -> Extractor {
        Extractor::from_config(&SelectorConfig::default()).unwrap()
    }

    const PAGE: &str = r#"<html><body><h1>Headline</h1><div class="story-body">Body</div></body></html>"#;

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let session = ScriptedSession::new(0, PAGE);
        let record = fetch_record(&session, "https://example.com/a", &extractor(), &policy(2))
            .await
            .unwrap();
        assert_eq!(record.title, "Headline");
        assert_eq!(record.body, "Body");
        assert_eq!(session.navigations.load(Ordering::SeqCst), 1);
        assert_eq!(session.scripts.borrow().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let session = ScriptedSession::new(1, PAGE);
        let started = tokio::time::Instant::now();
        let record = fetch_record(&session, "https://example.com/a", &extractor(), &policy(2)).await;
        assert!(record.is_some());
        assert_eq!(session.navigations.load(Ordering::SeqCst), 2);
        // one backoff plus one settle
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_reuse_neutralizes_every_navigation() {
        let session = ScriptedSession::new(1, PAGE);
        let extractor = extractor();
        let urls = ["https://example.com/a", "https://example.com/b", "https://example.com/c"];
        for url in urls {
            let record = fetch_record(&session, url, &extractor, &policy(2)).await;
            assert_eq!(record.map(|r| r.url), Some(url.to_string()));
        }

        // one failed navigation on the first URL, then one per URL
        assert_eq!(session.navigations.load(Ordering::SeqCst), 4);
        let scripts = session.scripts.borrow();
        assert_eq!(scripts.len(), 3);
        assert!(scripts.iter().all(|s| s == extractor.neutralize_script()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_attempts_exactly_max() {
        let session = ScriptedSession::new(u32::MAX, PAGE);
        let record = fetch_record(&session, "https://example.com/a", &extractor(), &policy(3)).await;
        assert!(record.is_none());
        assert_eq!(session.navigations.load(Ordering::SeqCst), 3);
        assert!(session.scripts.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_navigation_times_out() {
        let mut session = ScriptedSession::new(0, PAGE);
        session.hang = true;
        let record = fetch_record(&session, "https://example.com/a", &extractor(), &policy(2)).await;
        assert!(record.is_none());
        assert_eq!(session.navigations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_title_still_yields_record() {
        let session = ScriptedSession::new(0, r#"<div class="story-body">Only body</div>"#);
        let record = fetch_record(&session, "https://example.com/a", &extractor(), &policy(1))
            .await
            .unwrap();
        assert_eq!(record.title, MISSING_TITLE);
        assert_eq!(record.body, "Only body");
    }

    #[test]
    fn test_policy_from_config() {
        let p = FetchPolicy::from_config(&ScrapeConfig::default());
        assert_eq!(p.max_attempts, 2);
        assert_eq!(p.navigation_timeout, Duration::from_secs(60));
    }
}

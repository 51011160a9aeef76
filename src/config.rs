//! Run configuration.
//!
//! A [`ScrapeConfig`] is loaded once from an optional YAML file, adjusted
//! by CLI overrides, validated, and then passed by reference to every
//! pipeline stage. Nothing in the crate reads configuration from globals.
//!
//! # Example
//!
//! ```yaml
//! feeds:
//!   - https://www.ft.com/world?format=rss
//! per_feed_limit: 10
//! pool_width: 3
//! timings:
//!   settle_millis: 1500
//! output:
//!   json_path: ./data/articles.json
//!   csv_path: ./data/articles.csv
//! ```

use chrono::{FixedOffset, NaiveTime};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid CSS selector `{selector}` in `{field}`: {reason}")]
    Selector {
        field: &'static str,
        selector: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for a scraping run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Feed sources, processed in this order.
    pub feeds: Vec<Url>,
    /// Maximum same-day items kept from each feed.
    pub per_feed_limit: usize,
    /// Maximum candidate URLs kept across all feeds.
    pub global_limit: usize,
    /// Browser tabs per batch, and the concurrency bound inside a batch.
    pub pool_width: usize,
    /// Navigation attempts per URL.
    pub max_attempts: u32,
    /// Optional proxy passed to the browser at launch.
    pub proxy: Option<Url>,
    /// One of these is picked at random each time the browser is launched.
    pub user_agents: Vec<String>,
    /// Run Chrome without a window.
    pub headless: bool,
    /// UTC offset (minutes) whose calendar day decides feed freshness.
    pub reference_utc_offset_minutes: i32,
    pub timings: Timings,
    pub selectors: SelectorConfig,
    pub output: OutputConfig,
    pub schedule: ScheduleConfig,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            feeds: default_feeds(),
            per_feed_limit: 20,
            global_limit: 20,
            pool_width: 5,
            max_attempts: 2,
            proxy: None,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36".to_string(),
            ],
            headless: true,
            reference_utc_offset_minutes: 0,
            timings: Timings::default(),
            selectors: SelectorConfig::default(),
            output: OutputConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

fn default_feeds() -> Vec<Url> {
    [
        "https://www.ft.com/world?format=rss",
        "https://www.ft.com/companies?format=rss",
    ]
    .iter()
    .filter_map(|s| Url::parse(s).ok())
    .collect()
}

/// Wait and timeout durations, in milliseconds on disk.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Timings {
    /// Upper bound for one navigation attempt.
    pub navigation_timeout_millis: u64,
    /// Pause after overlay removal so deferred content can render.
    /// A heuristic; it does not guarantee the page is complete.
    pub settle_millis: u64,
    /// Pause between failed attempts on the same URL.
    pub retry_backoff_millis: u64,
    /// Pause between consecutive batches.
    pub batch_pause_millis: u64,
    /// Timeout for each feed HTTP request.
    pub feed_timeout_millis: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            navigation_timeout_millis: 60_000,
            settle_millis: 2_000,
            retry_backoff_millis: 3_000,
            batch_pause_millis: 2_000,
            feed_timeout_millis: 30_000,
        }
    }
}

impl Timings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_millis)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_millis)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_millis)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_millis)
    }
}

/// CSS selectors used on article pages.
///
/// Field lists are tried in order; the first selector that locates an
/// element wins.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub title: Vec<String>,
    pub body: Vec<String>,
    pub published: Vec<String>,
    pub author: Vec<String>,
    /// Overlays removed from the page before extraction.
    pub overlays: Vec<String>,
    /// Content containers forced visible before extraction.
    pub gated_content: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        fn list(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Self {
            title: list(&["h1.article__title", "h1"]),
            body: list(&[".article__content-body", ".story-body"]),
            published: list(&["time[data-trackable=\"date\"]"]),
            author: list(&[".article__author", ".byline"]),
            overlays: list(&[".paywall-overlay", ".article-paywall", "[data-paywall]"]),
            gated_content: list(&[".article__content-body", ".story-body"]),
        }
    }
}

/// Where results and failures are written.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub json_path: PathBuf,
    pub csv_path: PathBuf,
    /// Append-only log of run-level failures. Disabled when `None`.
    pub error_log: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_path: PathBuf::from("articles.json"),
            csv_path: PathBuf::from("articles.csv"),
            error_log: Some(PathBuf::from("errors.log")),
        }
    }
}

/// Daily trigger settings used by `--daily`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// UTC time of day at which each scheduled run starts.
    pub daily_at_utc: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at_utc: NaiveTime::MIN,
        }
    }
}

impl ScrapeConfig {
    /// Load configuration from `path`, or defaults when no path is given.
    ///
    /// An empty file is treated as "all defaults".
    #[instrument(level = "info", skip_all)]
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Self::default());
        };

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), feeds = config.feeds.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Check limits and selectors before anything touches the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("at least one feed is required".into()));
        }
        if self.pool_width == 0 {
            return Err(ConfigError::Invalid("pool_width must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.per_feed_limit == 0 || self.global_limit == 0 {
            return Err(ConfigError::Invalid(
                "per_feed_limit and global_limit must be at least 1".into(),
            ));
        }
        if self.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::Invalid("user_agents must not be empty".into()));
        }
        if self.reference_offset().is_none() {
            return Err(ConfigError::Invalid(format!(
                "reference_utc_offset_minutes out of range: {}",
                self.reference_utc_offset_minutes
            )));
        }

        for (field, selectors) in self.selectors.fields() {
            if selectors.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "selector list `{field}` must not be empty"
                )));
            }
            compile_selectors(field, selectors)?;
        }
        Ok(())
    }

    /// Offset whose midnight starts the freshness window.
    pub fn reference_offset(&self) -> Option<FixedOffset> {
        self.reference_utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }
}

impl SelectorConfig {
    fn fields(&self) -> [(&'static str, &[String]); 6] {
        [
            ("title", &self.title),
            ("body", &self.body),
            ("published", &self.published),
            ("author", &self.author),
            ("overlays", &self.overlays),
            ("gated_content", &self.gated_content),
        ]
    }
}

/// Parse a selector list, reporting the first invalid entry.
pub fn compile_selectors(
    field: &'static str,
    selectors: &[String],
) -> Result<Vec<Selector>, ConfigError> {
    selectors
        .iter()
        .map(|raw| {
            Selector::parse(raw).map_err(|e| ConfigError::Selector {
                field,
                selector: raw.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScrapeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pool_width, 5);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.timings.settle(), Duration::from_secs(2));
        assert_eq!(config.timings.retry_backoff(), Duration::from_secs(3));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(ScrapeConfig::from_yaml("  \n").unwrap(), ScrapeConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
feeds:
  - https://example.com/rss
pool_width: 2
timings:
  settle_millis: 10
output:
  json_path: out/a.json
  error_log: null
schedule:
  daily_at_utc: "06:30:00"
"#;
        let config = ScrapeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.pool_width, 2);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.timings.settle_millis, 10);
        assert_eq!(config.timings.retry_backoff_millis, 3_000);
        assert_eq!(config.output.json_path, PathBuf::from("out/a.json"));
        assert_eq!(config.output.csv_path, PathBuf::from("articles.csv"));
        assert!(config.output.error_log.is_none());
        assert_eq!(
            config.schedule.daily_at_utc,
            NaiveTime::from_hms_opt(6, 30, 0).unwrap()
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_pool_width_rejected() {
        let config = ScrapeConfig {
            pool_width: 0,
            ..ScrapeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_selector_rejected() {
        let mut config = ScrapeConfig::default();
        config.selectors.title = vec!["h1[".to_string()];
        match config.validate() {
            Err(ConfigError::Selector { field, selector, .. }) => {
                assert_eq!(field, "title");
                assert_eq!(selector, "h1[");
            }
            other => panic!("expected selector error, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_offset() {
        let config = ScrapeConfig {
            reference_utc_offset_minutes: -300,
            ..ScrapeConfig::default()
        };
        assert_eq!(
            config.reference_offset(),
            FixedOffset::west_opt(5 * 3600)
        );

        let broken = ScrapeConfig {
            reference_utc_offset_minutes: 24 * 60,
            ..ScrapeConfig::default()
        };
        assert!(broken.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_errors() {
        let err = ScrapeConfig::load(Some(Path::new("/definitely/not/here.yaml")))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[tokio::test]
    async fn test_load_without_path_is_default() {
        let config = ScrapeConfig::load(None).await.unwrap();
        assert_eq!(config, ScrapeConfig::default());
    }
}

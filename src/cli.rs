//! Command-line interface definitions for Feed Swarm.
//!
//! Every flag overrides the matching value from the YAML config file, and
//! most can also be supplied through environment variables.

use crate::config::ScrapeConfig;
use clap::Parser;
use std::path::PathBuf;
use url::Url;

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # One run with defaults (FT world + companies feeds)
/// feed_swarm
///
/// # Custom config, narrower pool, scheduled daily
/// feed_swarm --config swarm.yaml --pool-width 3 --daily
///
/// # Ad-hoc feed list and output location
/// feed_swarm -f https://example.com/rss -f https://example.org/atom.xml --json-output out/a.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "FEED_SWARM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Feed URL; repeat to replace the configured feed list
    #[arg(short, long = "feed")]
    pub feeds: Vec<Url>,

    /// Maximum same-day items kept per feed
    #[arg(long)]
    pub per_feed_limit: Option<usize>,

    /// Maximum URLs scraped per run
    #[arg(long)]
    pub global_limit: Option<usize>,

    /// Browser tabs per batch
    #[arg(short, long)]
    pub pool_width: Option<usize>,

    /// Navigation attempts per URL
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Proxy URL for the browser
    #[arg(long, env = "FEED_SWARM_PROXY")]
    pub proxy: Option<Url>,

    /// Output path for the JSON collection
    #[arg(short, long)]
    pub json_output: Option<PathBuf>,

    /// Output path for the CSV table
    #[arg(long)]
    pub csv_output: Option<PathBuf>,

    /// Append-only log of failed runs
    #[arg(long)]
    pub error_log: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Keep running and scrape once a day at the configured UTC time
    #[arg(long)]
    pub daily: bool,
}

impl Cli {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut ScrapeConfig) {
        if !self.feeds.is_empty() {
            config.feeds = self.feeds.clone();
        }
        if let Some(n) = self.per_feed_limit {
            config.per_feed_limit = n;
        }
        if let Some(n) = self.global_limit {
            config.global_limit = n;
        }
        if let Some(n) = self.pool_width {
            config.pool_width = n;
        }
        if let Some(n) = self.max_attempts {
            config.max_attempts = n;
        }
        if let Some(proxy) = &self.proxy {
            config.proxy = Some(proxy.clone());
        }
        if let Some(path) = &self.json_output {
            config.output.json_path = path.clone();
        }
        if let Some(path) = &self.csv_output {
            config.output.csv_path = path.clone();
        }
        if let Some(path) = &self.error_log {
            config.output.error_log = Some(path.clone());
        }
        if self.headful {
            config.headless = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_leave_config_alone() {
        let cli = Cli::parse_from(["feed_swarm"]);
        let mut config = ScrapeConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, ScrapeConfig::default());
        assert!(!cli.daily);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "feed_swarm",
            "-f",
            "https://example.com/rss",
            "--feed",
            "https://example.org/atom.xml",
            "-p",
            "3",
            "--max-attempts",
            "4",
            "-j",
            "/tmp/a.json",
            "--csv-output",
            "/tmp/a.csv",
            "--headful",
            "--daily",
        ]);
        let mut config = ScrapeConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[1].as_str(), "https://example.org/atom.xml");
        assert_eq!(config.pool_width, 3);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.output.json_path, PathBuf::from("/tmp/a.json"));
        assert_eq!(config.output.csv_path, PathBuf::from("/tmp/a.csv"));
        assert!(!config.headless);
        assert!(cli.daily);
    }

    #[test]
    fn test_cli_rejects_bad_feed_url() {
        assert!(Cli::try_parse_from(["feed_swarm", "--feed", "not a url"]).is_err());
    }
}

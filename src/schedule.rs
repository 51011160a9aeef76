//! Daily trigger and run-failure log.
//!
//! In `--daily` mode the pipeline runs once at start-up and then at the
//! configured UTC time every day until Ctrl-C. A failed run never stops the
//! loop; it is logged and, when an error log is configured, appended to it
//! as `<RFC 3339 timestamp> - <error>`.

use crate::config::ScrapeConfig;
use crate::pipeline::run_once;
use chrono::{DateTime, Duration, NaiveTime, SecondsFormat, Utc};
use std::io;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument, warn};

/// Next instant strictly after `now` whose UTC time of day is `at`.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Append one timestamped failure line to `path`.
pub async fn append_error_log(path: &Path, at: DateTime<Utc>, message: &str) -> io::Result<()> {
    let line = format!(
        "{} - {}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        message.replace('\n', " ")
    );
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

/// Run once and record a failure in the error log. Returns whether the run succeeded.
pub async fn run_and_log(config: &ScrapeConfig) -> bool {
    match run_once(config).await {
        Ok(report) => {
            info!(count = report.scraped, stored = report.stored, "Run finished");
            true
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            if let Some(log) = &config.output.error_log {
                if let Err(io_err) = append_error_log(log, Utc::now(), &e.to_string()).await {
                    warn!(path = %log.display(), error = %io_err, "Could not append to error log");
                }
            }
            false
        }
    }
}

/// Run immediately, then once a day at `config.schedule.daily_at_utc`, until Ctrl-C.
#[instrument(level = "info", skip_all, fields(daily_at_utc = %config.schedule.daily_at_utc))]
pub async fn run_daily(config: &ScrapeConfig) {
    info!("Initial run");
    run_and_log(config).await;

    loop {
        let now = Utc::now();
        let next = next_daily_run(now, config.schedule.daily_at_utc);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next.to_rfc3339(), "Scheduler waiting for next run");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                info!(started = %Utc::now().to_rfc3339(), "Starting daily scrape");
                if run_and_log(config).await {
                    info!("Daily scrape completed successfully");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; scheduler stopping");
                return;
            }
        }
    }
}

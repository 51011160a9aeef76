//! Persistence of scraped records across runs.
//!
//! Two independent sinks hold the same deduplicated history, keyed by URL:
//!
//! - [`json`]: the full collection, rewritten on every flush
//! - [`table`]: an append-only CSV table
//!
//! [`Store::merge`] applies one run's records to both. There is no
//! transaction spanning the two files; if only one write succeeds the
//! error says which sink was written so the other can be reconciled by hand.
//!
//! # Output Structure
//!
//! ```text
//! articles.json   # [ { "url": ..., "title": ..., "body": ..., "publishedLabel": ..., "authorLabel": ... }, ... ]
//! articles.csv    # URL,Title,Body,Date,Author
//! ```

use crate::config::OutputConfig;
use crate::models::FetchRecord;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, instrument};

pub mod json;
pub mod table;

/// Names one of the two sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Collection,
    Table,
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Collection => f.write_str("JSON collection"),
            Sink::Table => f.write_str("CSV table"),
        }
    }
}

/// Persistence failures. Any of these fails the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: ::csv::Error,
    },
    #[error("only the {written} was updated; the other sink failed: {source}")]
    SplitWrite {
        written: Sink,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Counts of what a merge actually wrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Records added to the JSON collection.
    pub stored: usize,
    /// Rows appended to the CSV table.
    pub tabular_appended: usize,
}

/// The pair of sinks for one deployment.
#[derive(Debug, Clone)]
pub struct Store {
    json_path: PathBuf,
    csv_path: PathBuf,
}

impl Store {
    pub fn new(json_path: impl Into<PathBuf>, csv_path: impl Into<PathBuf>) -> Self {
        Self {
            json_path: json_path.into(),
            csv_path: csv_path.into(),
        }
    }

    pub fn from_config(output: &OutputConfig) -> Self {
        Self::new(&output.json_path, &output.csv_path)
    }

    pub fn json_path(&self) -> &Path {
        &self.json_path
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Add every record whose URL is not stored yet to both sinks.
    ///
    /// # Arguments
    ///
    /// * `new_records` - Records from one run; repeated URLs keep the first occurrence
    ///
    /// # Returns
    ///
    /// How many records joined the JSON collection and how many rows were
    /// appended to the CSV table. Nothing is written when no record is new.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the collection cannot be read or parsed, or
    /// if a write fails. [`StoreError::SplitWrite`] names the sink that was
    /// updated when only one of the two writes succeeded.
    #[instrument(level = "info", skip_all, fields(incoming = new_records.len()))]
    pub async fn merge(&self, new_records: &[FetchRecord]) -> Result<MergeOutcome, StoreError> {
        let mut collection = json::load_collection(&self.json_path).await?;
        let mut keys: HashSet<String> = collection.iter().map(|r| r.url.clone()).collect();

        let to_add: Vec<FetchRecord> = new_records
            .iter()
            .filter(|r| keys.insert(r.url.clone()))
            .cloned()
            .collect();

        if to_add.is_empty() {
            info!(existing = collection.len(), "Nothing new to store");
            return Ok(MergeOutcome::default());
        }

        collection.extend(to_add.iter().cloned());
        let structured = json::write_collection(&self.json_path, &collection).await;
        let tabular = table::append_new(&self.csv_path, &to_add).await;

        match (structured, tabular) {
            (Ok(()), Ok(rows)) => {
                info!(
                    stored = to_add.len(),
                    tabular_appended = rows,
                    total = collection.len(),
                    "Merged records"
                );
                Ok(MergeOutcome {
                    stored: to_add.len(),
                    tabular_appended: rows,
                })
            }
            (Ok(()), Err(e)) => Err(StoreError::SplitWrite {
                written: Sink::Collection,
                source: Box::new(e),
            }),
            (Err(e), Ok(rows)) if rows > 0 => Err(StoreError::SplitWrite {
                written: Sink::Table,
                source: Box::new(e),
            }),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(table_err)) => {
                error!(error = %table_err, "CSV table write also failed");
                Err(e)
            }
        }
    }
}

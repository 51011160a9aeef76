//! Data models shared by the pipeline stages.
//!
//! - [`FeedEntry`]: one item read from an RSS or Atom feed
//! - [`FetchRecord`]: the structured fields extracted from an article page
//! - [`RunReport`]: counters produced by a single pipeline run
//!
//! Article URLs travel between stages as plain `String`s; the feed stage
//! guarantees they are unique within one discovery pass.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Placeholder stored when no title selector matched.
pub const MISSING_TITLE: &str = "No title";
/// Placeholder stored when no body selector matched.
pub const MISSING_BODY: &str = "No body";
/// Placeholder stored when no publication-date selector matched.
pub const MISSING_DATE: &str = "No date";
/// Placeholder stored when no author selector matched.
pub const MISSING_AUTHOR: &str = "No author";

/// A single item from a syndication feed.
///
/// Only the fields needed for discovery are kept; everything else in the
/// feed is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    /// Item title, if the feed provided one.
    pub title: Option<String>,
    /// Article URL.
    pub link: Option<String>,
    /// Publication timestamp. `None` when absent or unparseable.
    pub published: Option<DateTime<FixedOffset>>,
}

/// Structured content captured from one article page.
///
/// Every text field falls back to its `MISSING_*` placeholder when the page
/// had no matching element, so a record is always complete. `url` is the
/// key used to deduplicate records across runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRecord {
    /// The article URL that was navigated to.
    pub url: String,
    /// Headline text.
    pub title: String,
    /// Article body text.
    pub body: String,
    /// Publication date exactly as rendered on the page.
    #[serde(alias = "date")]
    pub published_label: String,
    /// Byline exactly as rendered on the page.
    #[serde(alias = "author")]
    pub author_label: String,
}

impl FetchRecord {
    /// Build a record where every extracted field is the placeholder.
    pub fn missing(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: MISSING_TITLE.to_string(),
            body: MISSING_BODY.to_string(),
            published_label: MISSING_DATE.to_string(),
            author_label: MISSING_AUTHOR.to_string(),
        }
    }

    /// Columns in the order of the CSV header `URL,Title,Body,Date,Author`.
    pub fn csv_row(&self) -> [&str; 5] {
        [
            &self.url,
            &self.title,
            &self.body,
            &self.published_label,
            &self.author_label,
        ]
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Candidate URLs returned by feed discovery.
    pub discovered: usize,
    /// Records successfully scraped this run.
    pub scraped: usize,
    /// Records newly added to the JSON collection.
    pub stored: usize,
    /// Rows newly appended to the CSV table.
    pub tabular_appended: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_record_uses_placeholders() {
        let record = FetchRecord::missing("https://example.com/a");
        assert_eq!(record.url, "https://example.com/a");
        assert_eq!(record.title, MISSING_TITLE);
        assert_eq!(record.body, MISSING_BODY);
        assert_eq!(record.published_label, MISSING_DATE);
        assert_eq!(record.author_label, MISSING_AUTHOR);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = FetchRecord {
            url: "https://example.com/a".to_string(),
            title: "Title".to_string(),
            body: "Body".to_string(),
            published_label: "19 October 2026".to_string(),
            author_label: "Jane Roe".to_string(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"publishedLabel\":\"19 October 2026\""));
        assert!(json.contains("\"authorLabel\":\"Jane Roe\""));
    }

    #[test]
    fn test_record_reads_legacy_keys() {
        let json = r#"{
            "url": "https://example.com/a",
            "title": "Title",
            "body": "Body",
            "date": "Yesterday",
            "author": "Staff"
        }"#;

        let record: FetchRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.published_label, "Yesterday");
        assert_eq!(record.author_label, "Staff");
    }

    #[test]
    fn test_csv_row_order() {
        let record = FetchRecord::missing("u");
        assert_eq!(
            record.csv_row(),
            ["u", MISSING_TITLE, MISSING_BODY, MISSING_DATE, MISSING_AUTHOR]
        );
    }
}

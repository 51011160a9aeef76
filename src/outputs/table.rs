//! CSV table sink.
//!
//! The table starts with the header `URL,Title,Body,Date,Author` and only ever
//! grows: new rows are appended, existing rows are never touched. Before
//! appending, the URL column is read back so a URL already in the table is
//! not written twice.

use super::StoreError;
use crate::models::FetchRecord;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

pub const HEADER: [&str; 5] = ["URL", "Title", "Body", "Date", "Author"];

/// Existing table state: the URLs already present and what must precede new rows.
#[derive(Debug, Default)]
pub struct TableState {
    pub urls: HashSet<String>,
    pub needs_header: bool,
    /// The last row was left without a line terminator, e.g. by an interrupted append.
    pub needs_newline: bool,
}

/// Read the URL column of the table at `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_state(path: &Path) -> Result<TableState, StoreError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No existing CSV table; will create it");
            return Ok(TableState {
                needs_header: true,
                ..TableState::default()
            });
        }
        Err(source) => return Err(StoreError::io(path, source)),
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(TableState {
            needs_header: true,
            ..TableState::default()
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(raw.as_slice());

    // Byte records: a stray non-UTF-8 byte in a body column must not block appends.
    let mut urls = HashSet::new();
    for row in reader.byte_records() {
        let row = row.map_err(|source| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(url) = row.get(0).filter(|u| !u.is_empty()) {
            urls.insert(String::from_utf8_lossy(url).into_owned());
        }
    }

    Ok(TableState {
        urls,
        needs_header: false,
        needs_newline: !raw.ends_with(b"\n"),
    })
}

/// Encode `records` as CSV rows, with the header first when requested.
pub fn encode_rows(records: &[&FetchRecord], with_header: bool) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    if with_header {
        writer.write_record(HEADER)?;
    }
    for record in records {
        writer.write_record(record.csv_row())?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Append the records whose URL is not yet in the table. Returns how many were written.
#[instrument(level = "info", skip_all, fields(path = %path.display(), candidates = records.len()))]
pub async fn append_new(path: &Path, records: &[FetchRecord]) -> Result<usize, StoreError> {
    let state = load_state(path).await?;

    let mut seen = state.urls;
    let fresh: Vec<&FetchRecord> = records
        .iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect();

    if fresh.is_empty() {
        info!("No new CSV rows");
        return Ok(0);
    }

    let mut bytes = Vec::new();
    if state.needs_newline {
        bytes.push(b'\n');
    }
    bytes.extend(
        encode_rows(&fresh, state.needs_header).map_err(|source| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        })?,
    );

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| StoreError::io(dir, source))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| StoreError::io(path, source))?;
    file.write_all(&bytes)
        .await
        .map_err(|source| StoreError::io(path, source))?;
    file.flush()
        .await
        .map_err(|source| StoreError::io(path, source))?;

    info!(rows = fresh.len(), "Appended CSV rows");
    Ok(fresh.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, title: &str) -> FetchRecord {
        FetchRecord {
            url: url.to_string(),
            title: title.to_string(),
            ..FetchRecord::missing(url)
        }
    }

    #[test]
    fn test_encode_quotes_commas_and_newlines() {
        let r = FetchRecord {
            body: "line one, still one\nline two".to_string(),
            ..record("https://example.com/a", "Say \"hi\"")
        };
        let out = String::from_utf8(encode_rows(&[&r], true).unwrap()).unwrap();
        assert!(out.starts_with("URL,Title,Body,Date,Author\n"));
        assert!(out.contains("\"Say \"\"hi\"\"\""));
        assert!(out.contains("\"line one, still one\nline two\""));
    }

    #[tokio::test]
    async fn test_append_creates_header_once() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("articles.csv");

        let first = append_new(&path, &[record("https://example.com/a", "A")])
            .await
            .unwrap();
        let second = append_new(
            &path,
            &[
                record("https://example.com/a", "A again"),
                record("https://example.com/b", "B"),
            ],
        )
        .await
        .unwrap();

        assert_eq!((first, second), (1, 1));
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text.matches("URL,Title,Body,Date,Author").count(), 1);
        assert_eq!(text.lines().count(), 3);
        assert!(!text.contains("A again"));
    }

    #[tokio::test]
    async fn test_state_reads_quoted_urls() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("articles.csv");
        tokio::fs::write(
            &path,
            "URL,Title,Body,Date,Author\n\"https://example.com/x,y\",T,\"multi\nline\",D,A\n",
        )
        .await
        .unwrap();

        let state = load_state(&path).await.unwrap();
        assert!(!state.needs_header);
        assert!(state.urls.contains("https://example.com/x,y"));
        assert_eq!(state.urls.len(), 1);
    }

    #[tokio::test]
    async fn test_append_after_unterminated_last_row() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("articles.csv");
        tokio::fs::write(&path, "URL,Title,Body,Date,Author\nhttps://example.com/a,T,B,D,A")
            .await
            .unwrap();

        assert!(load_state(&path).await.unwrap().needs_newline);
        let written = append_new(&path, &[record("https://example.com/b", "B")])
            .await
            .unwrap();
        assert_eq!(written, 1);

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "https://example.com/a,T,B,D,A");
        assert!(lines[2].starts_with("https://example.com/b,B,"));

        let state = load_state(&path).await.unwrap();
        assert!(!state.needs_newline);
        assert!(state.urls.contains("https://example.com/a"));
        assert!(state.urls.contains("https://example.com/b"));
    }

    #[tokio::test]
    async fn test_state_tolerates_non_utf8_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("articles.csv");
        let mut raw = b"URL,Title,Body,Date,Author\nhttps://example.com/a,T,".to_vec();
        raw.extend([0xff, 0xfe]);
        raw.extend(b",D,A\n");
        tokio::fs::write(&path, &raw).await.unwrap();

        let state = load_state(&path).await.unwrap();
        assert!(state.urls.contains("https://example.com/a"));

        let written = append_new(&path, &[record("https://example.com/b", "B")])
            .await
            .unwrap();
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn test_empty_input_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("articles.csv");
        assert_eq!(append_new(&path, &[]).await.unwrap(), 0);
        assert!(!path.exists());
    }
}

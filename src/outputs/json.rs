//! JSON collection sink.
//!
//! The file holds a single pretty-printed array of [`FetchRecord`]s covering
//! every article ever stored. Each flush rewrites the whole array: the new
//! contents go to a sibling temporary file that is then renamed over the
//! target, so readers never observe a half-written collection.

use super::StoreError;
use crate::models::FetchRecord;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Load the stored collection. A missing file is an empty collection.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_collection(path: &Path) -> Result<Vec<FetchRecord>, StoreError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No existing JSON collection; starting empty");
            return Ok(Vec::new());
        }
        Err(source) => return Err(StoreError::io(path, source)),
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace the stored collection with `records`.
#[instrument(level = "info", skip_all, fields(path = %path.display(), count = records.len()))]
pub async fn write_collection(path: &Path, records: &[FetchRecord]) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(records).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| StoreError::io(dir, source))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    fs::write(tmp, &json)
        .await
        .map_err(|source| StoreError::io(tmp, source))?;
    fs::rename(tmp, path)
        .await
        .map_err(|source| StoreError::io(path, source))?;

    info!("Wrote JSON collection");
    Ok(())
}

use std::io::{Cursor, Read};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::commit::CommitInfo;
use crate::error::{ControllerError, Result};
use crate::upstream::SnapshotSource;

pub const INDEX_FILE: &str = "index.json";

/// One measured flavor of one commit. Other fields of the published index
/// (timings, sizes) are ignored.
#[derive(Debug, Deserialize)]
struct IndexItem {
    hash: String,
    #[serde(rename = "commitTime")]
    commit_time: DateTime<FixedOffset>,
}

/// Downloads a published measurements slice: a zip archive holding an
/// `index.json` array.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    http: reqwest::Client,
}

impl HttpSnapshotSource {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_snapshot(&self, url: &str) -> Result<Option<Vec<CommitInfo>>> {
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let archive = response.error_for_status()?.bytes().await?;
        let index = extract_index(&archive)?;
        let commits = parse_index(url, &index)?;
        tracing::debug!(url, count = commits.len(), "Fetched coverage snapshot");
        Ok(Some(commits))
    }
}

/// Read `index.json` out of a zip archive.
pub fn extract_index(archive: &[u8]) -> Result<String> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let mut entry = match zip.by_name(INDEX_FILE) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ControllerError::MissingIndex(INDEX_FILE.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut index = String::new();
    entry
        .read_to_string(&mut index)
        .map_err(|e| ControllerError::Archive(e.into()))?;
    Ok(index)
}

/// Measured commits listed in an index, one entry per hash (the index has
/// one item per flavor).
pub fn parse_index(url: &str, index: &str) -> Result<Vec<CommitInfo>> {
    let items: Vec<IndexItem> =
        serde_json::from_str(index).map_err(|e| ControllerError::MalformedResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let mut seen = std::collections::HashSet::new();
    Ok(items
        .into_iter()
        .filter(|item| seen.insert(item.hash.clone()))
        .map(|item| CommitInfo::new(item.hash, item.commit_time.with_timezone(&Utc)))
        .collect())
}

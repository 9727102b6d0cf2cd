//! Sources of upstream commit history and of published coverage.

pub mod github;
pub mod snapshot;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::commit::CommitInfo;
use crate::error::Result;

pub use github::GitHubClient;
pub use snapshot::HttpSnapshotSource;

#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Hash of the newest commit on the default branch.
    ///
    /// An unparseable reply is reported as
    /// [`ControllerError::MalformedResponse`](crate::error::ControllerError::MalformedResponse).
    async fn latest_commit(&self, repository: &str) -> Result<String>;

    /// All commits made between `since` and `until`.
    async fn commits_in_range(
        &self,
        repository: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitInfo>>;
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Commits already measured, as published at `url`. `Ok(None)` when
    /// nothing is published there.
    async fn fetch_snapshot(&self, url: &str) -> Result<Option<Vec<CommitInfo>>>;
}

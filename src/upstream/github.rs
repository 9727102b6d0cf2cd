use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::Deserialize;

use crate::commit::CommitInfo;
use crate::error::{ControllerError, Result};
use crate::upstream::CommitSource;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("bench-controller/", env!("CARGO_PKG_VERSION"));
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    committer: ApiSignature,
}

#[derive(Debug, Deserialize)]
struct ApiSignature {
    date: DateTime<Utc>,
}

/// Commit source backed by the GitHub REST commits endpoint.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            api_base: API_BASE.to_string(),
            token,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn commits_url(&self, repository: &str) -> String {
        format!("{}/repos/{}/commits", self.api_base.trim_end_matches('/'), repository)
    }

    async fn fetch_page(&self, url: &str) -> Result<Vec<CommitInfo>> {
        tracing::debug!(url, "Querying commits");
        let mut request = self.http.get(url).header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let body = request.send().await?.text().await?;
        parse_commits(url, &body)
    }
}

#[async_trait]
impl CommitSource for GitHubClient {
    async fn latest_commit(&self, repository: &str) -> Result<String> {
        let url = format!("{}?per_page=1", self.commits_url(repository));
        self.fetch_page(&url)
            .await?
            .into_iter()
            .next()
            .map(|c| c.hash)
            .ok_or_else(|| ControllerError::NoCommits(repository.to_string()))
    }

    async fn commits_in_range(
        &self,
        repository: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitInfo>> {
        let url = format!(
            "{}?since={}&until={}&per_page={}",
            self.commits_url(repository),
            since.format(DATE_FORMAT),
            until.format(DATE_FORMAT),
            PAGE_SIZE
        );

        let mut commits = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.fetch_page(&format!("{url}&page={page}")).await?;
            if batch.is_empty() {
                break;
            }
            commits.extend(batch);
            page += 1;
        }

        tracing::debug!(repository, count = commits.len(), "Fetched commit history");
        Ok(commits)
    }
}

/// Parse a commits listing. Anything that is not a JSON array of commits
/// (rate-limit notices, HTML error pages) is a malformed response.
pub fn parse_commits(url: &str, body: &str) -> Result<Vec<CommitInfo>> {
    let commits: Vec<ApiCommit> =
        serde_json::from_str(body).map_err(|e| ControllerError::MalformedResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    Ok(commits
        .into_iter()
        .map(|c| CommitInfo::new(c.sha, c.commit.committer.date))
        .collect())
}

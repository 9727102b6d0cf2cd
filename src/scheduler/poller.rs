use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::commit::short_hash;
use crate::config::PollConfig;
use crate::error::Result;
use crate::upstream::CommitSource;

/// Watches upstream for a commit that has not been dispatched yet.
///
/// The last dispatched commit is read from a watch channel the controller
/// publishes to, so a poll that is already waiting sees new dispatches.
#[derive(Clone)]
pub struct CommitPoller {
    source: Arc<dyn CommitSource>,
    repository: String,
    config: PollConfig,
    processed: watch::Receiver<String>,
}

impl CommitPoller {
    pub fn new(
        source: Arc<dyn CommitSource>,
        repository: impl Into<String>,
        config: PollConfig,
        processed: watch::Receiver<String>,
    ) -> Self {
        Self {
            source,
            repository: repository.into(),
            config,
            processed,
        }
    }

    /// Wait `initial_delay`, then query upstream until its newest commit
    /// differs from the last dispatched one and return that commit.
    ///
    /// Malformed upstream replies are retried after `retry_delay`; any other
    /// error ends the poll.
    pub async fn poll_for_next_commit(
        self,
        initial_delay: Duration,
        mut last_queried: String,
    ) -> Result<String> {
        pause(initial_delay).await;

        loop {
            let commit = match self.source.latest_commit(&self.repository).await {
                Ok(commit) => commit,
                Err(e) if e.is_malformed_response() => {
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = self.config.retry_delay.as_secs(),
                        "Upstream reply could not be parsed"
                    );
                    pause(self.config.retry_delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if commit != last_queried {
                tracing::info!(commit = %commit, repository = %self.repository, "Latest upstream commit");
                last_queried = commit.clone();
            }

            let processed = self.processed.borrow().clone();
            if commit != processed {
                tracing::info!(commit = %commit, "Found commit that was not processed yet");
                return Ok(commit);
            }

            tracing::debug!(
                commit = short_hash(&commit),
                wait_secs = self.config.interval.as_secs(),
                "No new upstream commit"
            );
            pause(self.config.interval).await;
        }
    }
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        sleep(delay).await;
    }
}

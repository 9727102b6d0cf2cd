use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::DocumentStore;

pub const CONTROLLER_DOCUMENT: &str = "controller.json";

/// Durable bookkeeping of the scheduling loop.
///
/// The processed commit and its dispatch time only change together through
/// [`ControllerState::record_dispatch`], which saves immediately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    #[serde(default)]
    last_processed_commit: String,
    #[serde(default)]
    last_process_time: Option<DateTime<Utc>>,
    /// Newest commit seen upstream, dispatched or not
    #[serde(default)]
    pub last_queried_commit: String,
    /// Jobs dispatched so far, of any origin
    #[serde(default)]
    pub runs: u64,
}

impl ControllerState {
    pub fn load(store: &DocumentStore) -> Result<Self> {
        let state: Self = store.load(CONTROLLER_DOCUMENT)?.unwrap_or_default();
        tracing::info!(
            last_processed_commit = %state.last_processed_commit,
            last_process_time = ?state.last_process_time,
            last_queried_commit = %state.last_queried_commit,
            runs = state.runs,
            "Loaded controller state"
        );
        Ok(state)
    }

    pub fn save(&self, store: &DocumentStore) -> Result<()> {
        store.save(CONTROLLER_DOCUMENT, self)
    }

    pub fn last_processed_commit(&self) -> &str {
        &self.last_processed_commit
    }

    pub fn last_process_time(&self) -> Option<DateTime<Utc>> {
        self.last_process_time
    }

    /// Count one more dispatched job and return its run number.
    pub fn count_run(&mut self) -> u64 {
        self.runs += 1;
        self.runs
    }

    /// Record `commit` as the latest dispatched discovery and persist.
    pub fn record_dispatch(
        &mut self,
        commit: &str,
        now: DateTime<Utc>,
        store: &DocumentStore,
    ) -> Result<()> {
        self.last_processed_commit = commit.to_string();
        self.last_process_time = Some(now);
        self.save(store)
    }

    pub fn since_last_dispatch(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_process_time
            .map(|t| (now - t).to_std().unwrap_or(Duration::ZERO))
    }

    /// A discovered commit may be dispatched only once `cooldown` has passed
    /// since the previous dispatch.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.since_last_dispatch(now) {
            Some(elapsed) => elapsed > cooldown,
            None => true,
        }
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "last processed: {}, at: {}, last queried: {}, runs: {}",
            self.last_processed_commit,
            self.last_process_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
            self.last_queried_commit,
            self.runs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COOLDOWN: Duration = Duration::from_secs(50 * 60);

    #[test]
    fn test_fresh_state_accepts_any_commit() {
        let state = ControllerState::default();
        assert!(state.cooldown_elapsed(Utc::now(), COOLDOWN));
        assert!(state.since_last_dispatch(Utc::now()).is_none());
    }

    #[test]
    fn test_cooldown_blocks_recent_dispatch() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::new(dir.path());
        let now = Utc::now();
        let mut state = ControllerState::default();

        state
            .record_dispatch("abc", now - chrono::Duration::minutes(10), &store)
            .unwrap();
        assert!(!state.cooldown_elapsed(now, COOLDOWN));

        state
            .record_dispatch("abc", now - chrono::Duration::minutes(51), &store)
            .unwrap();
        assert!(state.cooldown_elapsed(now, COOLDOWN));
    }

    #[test]
    fn test_record_dispatch_persists() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::new(dir.path());
        let mut state = ControllerState::default();
        state.count_run();
        state.last_queried_commit = "def".to_string();
        state.record_dispatch("abc", Utc::now(), &store).unwrap();

        let loaded = ControllerState::load(&store).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.last_processed_commit(), "abc");
        assert_eq!(loaded.runs, 1);
    }

    #[test]
    fn test_missing_document_loads_default() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::new(dir.path());
        assert_eq!(ControllerState::load(&store).unwrap(), ControllerState::default());
    }
}

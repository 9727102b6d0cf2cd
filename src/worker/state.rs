use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commit::short_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Idle,
    Running,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Running => write!(f, "running"),
        }
    }
}

/// Identifies the job operation that currently owns a worker. A completion
/// carrying an older ticket belongs to a job the worker was taken away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct JobTicket(u64);

impl std::fmt::Display for JobTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why an operator restart directive was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartRejection {
    UnknownWorker,
    AlreadyIdle,
    NoRetainedCommit,
}

impl std::fmt::Display for RestartRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartRejection::UnknownWorker => write!(f, "worker does not exist"),
            RestartRejection::AlreadyIdle => write!(f, "worker is already idle"),
            RestartRejection::NoRetainedCommit => write!(f, "worker has no commit to restart"),
        }
    }
}

/// One remote benchmark slot.
///
/// `last_commit` is sticky: it keeps the hash of the latest assignment after
/// the worker goes idle so the run can be restarted. Whether the worker is
/// busy is answered by `state` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: u32,
    pub name: String,
    pub address: String,
    pub state: WorkerState,
    #[serde(default)]
    pub last_commit: String,
    /// Command line of the latest assignment, for diagnostics
    #[serde(default)]
    pub command: String,
    /// When the current state began
    pub since: DateTime<Utc>,
    #[serde(skip)]
    job: JobTicket,
}

impl Worker {
    pub fn new(id: u32, address: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: format!("Node {id}"),
            address: address.into(),
            state: WorkerState::Idle,
            last_commit: String::new(),
            command: String::new(),
            since: now,
            job: JobTicket::default(),
        }
    }

    pub fn document_name(id: u32) -> String {
        format!("node{id}.json")
    }

    /// Inverse of [`Worker::document_name`]
    pub fn id_from_document_name(name: &str) -> Option<u32> {
        name.strip_prefix("node")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    pub fn current_job(&self) -> JobTicket {
        self.job
    }

    /// Start a job for `commit`. Allowed from either state; starting while
    /// running is a restart and makes the previous ticket stale.
    pub fn begin(&mut self, commit: &str, command: String, now: DateTime<Utc>) -> JobTicket {
        self.job = JobTicket(self.job.0 + 1);
        self.state = WorkerState::Running;
        self.last_commit = commit.to_string();
        self.command = command;
        self.since = now;
        self.job
    }

    /// Return to idle if `job` still owns the worker. The commit is kept.
    pub fn finish(&mut self, job: JobTicket, now: DateTime<Utc>) -> bool {
        if !self.is_running() || job != self.job {
            return false;
        }
        self.state = WorkerState::Idle;
        self.since = now;
        true
    }

    /// Mark the worker idle without waiting for its job. Returns false when
    /// it was idle already.
    pub fn force_idle(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_idle() {
            return false;
        }
        self.state = WorkerState::Idle;
        self.since = now;
        // Whatever is still running remotely no longer owns this slot
        self.job = JobTicket(self.job.0 + 1);
        true
    }

    /// Commit to re-run for a restart directive.
    pub fn restart_commit(&self) -> Result<&str, RestartRejection> {
        if self.is_idle() {
            return Err(RestartRejection::AlreadyIdle);
        }
        if self.last_commit.is_empty() {
            return Err(RestartRejection::NoRetainedCommit);
        }
        Ok(&self.last_commit)
    }

    /// Compact one-word-per-field status, e.g. `[2] running 1h02m13s 3f2a9c1`
    pub fn status(&self, now: DateTime<Utc>) -> String {
        let elapsed = format_elapsed((now - self.since).num_seconds());
        match self.state {
            WorkerState::Running => format!(
                "[{}] {} {} {}",
                self.id,
                self.state,
                elapsed,
                short_hash(&self.last_commit)
            ),
            WorkerState::Idle => format!("[{}] {} {}", self.id, self.state, elapsed),
        }
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "id: {}, name: {}, address: {}, state: {}, commit: {}, since: {}, command: {}",
            self.id,
            self.name,
            self.address,
            self.state,
            self.last_commit,
            self.since.to_rfc3339(),
            self.command
        )
    }
}

fn format_elapsed(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

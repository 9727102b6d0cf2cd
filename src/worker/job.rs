//! Benchmark job operations run against a single worker.

use std::sync::Arc;
use std::time::Instant;

use crate::config::RemoteConfig;
use crate::error::Result;
use crate::worker::executor::{LineAction, LineFilter, RemoteExecutor};

const FINISHED_TAIL_LINES: usize = 5;
const RESUME_TAIL_LINES: usize = 8;

/// Which benchmark flavors a run covers. The default set is the script's
/// `-d` selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flavors {
    pub all: bool,
    pub threads: bool,
}

impl Flavors {
    /// Rotation used for newly discovered commits: every fifth run measures
    /// all flavors, and the run two after it adds the threads flavor.
    pub fn for_run(run: u64) -> Self {
        Self {
            all: run % 5 == 0,
            threads: run % 5 == 2,
        }
    }

    fn script_args(&self) -> String {
        let mut args = String::new();
        if !self.all {
            args.push_str("-d ");
        }
        if self.threads {
            args.push_str("-t ");
        }
        args
    }
}

/// What a finished job operation reports back to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct JobReport {
    pub success: bool,
    pub elapsed_secs: u64,
    pub log_tail: Vec<String>,
}

/// A benchmark run of one commit on one worker.
#[derive(Debug, Clone)]
pub struct BenchJob {
    pub worker_id: u32,
    pub address: String,
    pub commit: String,
    pub flavors: Flavors,
    remote: RemoteConfig,
}

impl BenchJob {
    pub fn new(
        worker_id: u32,
        address: impl Into<String>,
        commit: impl Into<String>,
        flavors: Flavors,
        remote: RemoteConfig,
    ) -> Self {
        Self {
            worker_id,
            address: address.into(),
            commit: commit.into(),
            flavors,
            remote,
        }
    }

    pub fn update_command(&self) -> String {
        format!("cd {}; git pull -r 2>&1", self.remote.scripts_dir)
    }

    pub fn bench_command(&self) -> String {
        format!(
            "nohup bash {}/scripts/bench-current.sh {}-h {} >> {} 2>&1",
            self.remote.scripts_dir,
            self.flavors.script_args(),
            self.commit,
            self.remote.log_file
        )
    }

    /// Refresh the benchmark scripts, run the benchmark to completion and
    /// collect the tail of the worker's log.
    pub async fn run(self, executor: Arc<dyn RemoteExecutor>) -> Result<JobReport> {
        let worker_id = self.worker_id;
        tracing::info!(
            worker_id,
            commit = %self.commit,
            all_flavors = self.flavors.all,
            threads = self.flavors.threads,
            "Starting benchmark"
        );

        match executor.execute(&self.address, &self.update_command(), None).await {
            Ok(update) if update.success => {
                tracing::info!(worker_id, output = %update.output.trim_end(), "Updated scripts");
            }
            Ok(update) => {
                tracing::warn!(worker_id, errors = %update.errors.trim_end(), "Script update failed");
            }
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "Script update failed");
            }
        }

        let started = Instant::now();
        let bench = executor
            .execute(&self.address, &self.bench_command(), None)
            .await?;
        let elapsed_secs = started.elapsed().as_secs();
        if !bench.success {
            tracing::warn!(worker_id, commit = %self.commit, errors = %bench.errors.trim_end(), "Benchmark command failed");
        }
        tracing::info!(worker_id, commit = %self.commit, elapsed_secs, "Finished benchmark");

        let log_tail = read_log_tail(
            executor.as_ref(),
            &self.address,
            &self.remote.log_file,
            FINISHED_TAIL_LINES,
        )
        .await;

        Ok(JobReport {
            success: bench.success,
            elapsed_secs,
            log_tail,
        })
    }
}

/// Follow the log of a benchmark started before the controller restarted,
/// returning once the completion marker shows up.
pub async fn resume(
    worker_id: u32,
    address: String,
    remote: RemoteConfig,
    executor: Arc<dyn RemoteExecutor>,
) -> Result<JobReport> {
    let tail = read_log_tail(executor.as_ref(), &address, &remote.log_file, RESUME_TAIL_LINES).await;
    tracing::info!(worker_id, log_tail = ?tail, "Waiting for the running benchmark to finish");

    let marker = remote.completion_marker.clone();
    let filter: LineFilter = Box::new(move |line: &str| {
        if line.trim_end() == marker {
            LineAction::Stop
        } else {
            LineAction::Continue
        }
    });

    let started = Instant::now();
    let follow = executor
        .execute(&address, &format!("tail -f {}", remote.log_file), Some(filter))
        .await?;
    let elapsed_secs = started.elapsed().as_secs();
    tracing::info!(worker_id, elapsed_secs, found_marker = follow.stopped, "Finished waiting for benchmark");

    Ok(JobReport {
        success: follow.stopped,
        elapsed_secs,
        log_tail: last_lines(&follow.output, FINISHED_TAIL_LINES),
    })
}

async fn read_log_tail(
    executor: &dyn RemoteExecutor,
    address: &str,
    log_file: &str,
    lines: usize,
) -> Vec<String> {
    match executor
        .execute(address, &format!("tail -n{lines} {log_file}"), None)
        .await
    {
        Ok(result) => last_lines(&result.output, lines),
        Err(e) => {
            tracing::warn!(address, error = %e, "Failed to read benchmark log");
            Vec::new()
        }
    }
}

/// Last `n` non-empty lines of `text`
pub fn last_lines(text: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

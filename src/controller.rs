use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};

use crate::commit::CommitInfo;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::scheduler::{gaps, CommitPoller, ControllerState, SchedulerEvent, WorkQueue};
use crate::storage::DocumentStore;
use crate::upstream::{CommitSource, SnapshotSource};
use crate::worker::{job, BenchJob, Flavors, JobReport, JobTicket, RemoteExecutor, WorkerPool};

/// Operator requests applied once at startup.
#[derive(Debug, Clone, Default)]
pub struct Directives {
    /// Workers whose bookkeeping is forced back to idle
    pub idle: Vec<u32>,
    /// Running workers whose retained commit is benchmarked again
    pub restart: Vec<u32>,
    /// Commits to benchmark before anything else, in order
    pub commits: Vec<String>,
}

/// The single scheduling authority.
///
/// Owns all mutable state: the worker pool, the controller document, the work
/// queue and the pending candidate. Job and poll operations run as separate
/// tasks and report back through one event channel; the controller reacts to
/// one completion at a time.
pub struct Controller {
    config: ControllerConfig,
    store: DocumentStore,
    state: ControllerState,
    pool: WorkerPool,
    queue: WorkQueue,
    candidate: Option<String>,
    executor: Arc<dyn RemoteExecutor>,
    commits: Arc<dyn CommitSource>,
    snapshots: Arc<dyn SnapshotSource>,
    poller: CommitPoller,
    processed_tx: watch::Sender<String>,
    events_tx: mpsc::UnboundedSender<SchedulerEvent>,
    events_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    running_jobs: usize,
    /// Initial delay of the poll in flight, if one is
    poll_delay: Option<Duration>,
}

impl Controller {
    /// Load controller and worker documents from the configured state
    /// directory, creating a fresh pool when there are none.
    pub fn new(
        config: ControllerConfig,
        executor: Arc<dyn RemoteExecutor>,
        commits: Arc<dyn CommitSource>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Result<Self> {
        let store = DocumentStore::open(&config.state_dir)?;
        let state = ControllerState::load(&store)?;
        let pool = WorkerPool::restore_or_create(store.clone(), &config.pool)?;

        let (processed_tx, processed_rx) = watch::channel(state.last_processed_commit().to_string());
        let poller = CommitPoller::new(
            commits.clone(),
            config.repository.clone(),
            config.poll.clone(),
            processed_rx,
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            store,
            state,
            pool,
            queue: WorkQueue::new(),
            candidate: None,
            executor,
            commits,
            snapshots,
            poller,
            processed_tx,
            events_tx,
            events_rx,
            running_jobs: 0,
            poll_delay: None,
        })
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    pub fn running_jobs(&self) -> usize {
        self.running_jobs
    }

    pub fn poll_delay(&self) -> Option<Duration> {
        self.poll_delay
    }

    /// Queue an explicitly requested commit
    pub fn enqueue(&mut self, commit: impl Into<String>) {
        self.queue.push(commit);
    }

    /// Apply the directives and run the scheduling loop. Only returns on a
    /// storage failure, since continuing would lose dispatch history.
    pub async fn run(mut self, directives: Directives) -> Result<()> {
        self.start(directives).await?;
        loop {
            let event = self.next_event().await?;
            self.handle_event(event).await?;
        }
    }

    /// Startup: restarts, forced idles, resume of running workers, the
    /// requested commits, the first poll and one scheduling pass.
    pub async fn start(&mut self, directives: Directives) -> Result<()> {
        self.log_time_since_dispatch();

        let mut restarted = HashSet::new();
        for worker_id in directives.restart {
            match self.restart_worker(worker_id) {
                Ok(()) => {
                    restarted.insert(worker_id);
                }
                Err(e @ ControllerError::RestartRejected { .. }) => {
                    tracing::warn!(worker_id, error = %e, "Restart rejected");
                }
                Err(e) => return Err(e),
            }
        }

        for worker_id in directives.idle {
            self.force_idle(worker_id)?;
        }

        let resumable: Vec<(u32, String, JobTicket, String)> = self
            .pool
            .running()
            .filter(|w| !restarted.contains(&w.id))
            .map(|w| (w.id, w.address.clone(), w.current_job(), w.last_commit.clone()))
            .collect();
        for (worker_id, address, ticket, commit) in resumable {
            tracing::info!(worker_id, commit = %commit, "Resuming running worker");
            let remote = self.config.remote.clone();
            let executor = self.executor.clone();
            self.spawn_job(
                worker_id,
                ticket,
                commit,
                job::resume(worker_id, address, remote, executor),
            );
        }

        self.queue.extend(directives.commits);
        self.start_poll(Duration::ZERO);
        self.schedule().await
    }

    /// Re-run the retained commit of a running worker.
    pub fn restart_worker(&mut self, worker_id: u32) -> Result<()> {
        let commit = self
            .pool
            .restart_commit(worker_id)
            .map_err(|reason| ControllerError::RestartRejected { worker_id, reason })?;

        let run = self.state.count_run();
        self.state.save(&self.store)?;
        tracing::info!(worker_id, commit = %commit, run, "Restarting worker");
        self.assign(worker_id, &commit, Flavors::default())
    }

    /// Reclaim a worker without waiting for its job.
    pub fn force_idle(&mut self, worker_id: u32) -> Result<()> {
        if self.pool.get(worker_id).is_none() {
            tracing::warn!(worker_id, "Cannot set unknown worker to idle");
            return Ok(());
        }
        if self.pool.force_idle(worker_id, Utc::now())? {
            tracing::info!(worker_id, "Worker set to idle");
        }
        Ok(())
    }

    /// Wait for the next operation to finish.
    pub async fn next_event(&mut self) -> Result<SchedulerEvent> {
        self.events_rx
            .recv()
            .await
            .ok_or_else(|| ControllerError::Internal("event channel closed".to_string()))
    }

    /// React to one finished operation and hand out whatever work is pending.
    pub async fn handle_event(&mut self, event: SchedulerEvent) -> Result<()> {
        match event {
            SchedulerEvent::WorkerDone {
                worker_id,
                job,
                commit,
                result,
            } => {
                self.running_jobs = self.running_jobs.saturating_sub(1);
                self.job_finished(worker_id, job, &commit, result)?;
            }
            SchedulerEvent::PollDone { result } => {
                self.poll_delay = None;
                match result {
                    Ok(commit) => self.consider_candidate(commit),
                    Err(e) => tracing::warn!(error = %e, "Commit poll failed"),
                }
                self.start_poll(self.config.poll.reissue_delay);
            }
        }

        self.schedule().await
    }

    /// Hand out pending work: queued commits first, then the candidate, or a
    /// backfill when no candidate is waiting and workers are left over.
    async fn schedule(&mut self) -> Result<()> {
        self.drain_queue()?;

        match self.candidate.take() {
            None => {
                if self.pool.idle_count() > 1 {
                    self.fill_gap().await?;
                }
            }
            Some(commit) => match self.pool.first_idle() {
                Some(worker_id) => self.dispatch_candidate(worker_id, commit)?,
                None => {
                    tracing::debug!(commit = %commit, "No idle worker for candidate");
                    self.candidate = Some(commit);
                }
            },
        }

        self.log_status();
        Ok(())
    }

    fn job_finished(
        &mut self,
        worker_id: u32,
        job: JobTicket,
        commit: &str,
        result: Result<JobReport>,
    ) -> Result<()> {
        match &result {
            Ok(report) => tracing::info!(
                worker_id,
                commit,
                job = %job,
                success = report.success,
                elapsed_secs = report.elapsed_secs,
                log_tail = ?report.log_tail,
                "Job operation finished"
            ),
            Err(e) => tracing::warn!(worker_id, commit, job = %job, error = %e, "Job operation failed"),
        }

        if self.pool.complete(worker_id, job, Utc::now())? {
            tracing::info!(worker_id, commit, "Worker is idle");
        } else {
            tracing::info!(worker_id, job = %job, "Stale job finished, worker state unchanged");
        }
        Ok(())
    }

    fn consider_candidate(&mut self, commit: String) {
        self.state.last_queried_commit = commit.clone();
        let now = Utc::now();
        if self.state.cooldown_elapsed(now, self.config.poll.cooldown) {
            self.candidate = Some(commit);
        } else {
            tracing::info!(
                commit = %commit,
                since_last_secs = self.state.since_last_dispatch(now).map(|d| d.as_secs()),
                last_processed = %self.state.last_processed_commit(),
                "Commit is too soon after the last dispatch, skipping"
            );
        }
    }

    /// Hand queued commits to idle workers, lowest id first.
    fn drain_queue(&mut self) -> Result<()> {
        for worker_id in self.pool.idle_ids() {
            let Some(commit) = self.queue.pop() else {
                break;
            };
            let run = self.state.count_run();
            self.state.save(&self.store)?;
            tracing::info!(worker_id, commit = %commit, run, "Scheduling requested commit");
            self.assign(worker_id, &commit, Flavors::default())?;
        }
        Ok(())
    }

    fn dispatch_candidate(&mut self, worker_id: u32, commit: String) -> Result<()> {
        let run = self.state.count_run();
        self.log_time_since_dispatch();
        self.state.record_dispatch(&commit, Utc::now(), &self.store)?;
        self.processed_tx.send_replace(commit.clone());
        tracing::info!(worker_id, commit = %commit, run, "Scheduling new upstream commit");
        self.assign(worker_id, &commit, Flavors::for_run(run))
    }

    async fn fill_gap(&mut self) -> Result<()> {
        let Some(worker_id) = self.pool.first_idle() else {
            return Ok(());
        };
        let Some(target) = self.backfill_target().await else {
            return Ok(());
        };

        let run = self.state.count_run();
        self.state.save(&self.store)?;
        tracing::info!(worker_id, commit = %target.hash, run, "Backfilling coverage gap");
        self.assign(worker_id, &target.hash, Flavors::default())
    }

    /// Fetch history and the published coverage and pick a commit to fill
    /// the largest gap. Fetch failures mean no gap this round.
    async fn backfill_target(&self) -> Option<CommitInfo> {
        let until = Utc::now();
        let window = chrono::Duration::from_std(self.config.history_window).ok()?;
        let history = match self
            .commits
            .commits_in_range(&self.config.repository, until - window, until)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch commit history");
                return None;
            }
        };

        let snapshot = match self.snapshots.fetch_snapshot(&self.config.snapshot_url).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::warn!(url = %self.config.snapshot_url, "Coverage snapshot not found");
                return None;
            }
            Err(e) => {
                tracing::warn!(url = %self.config.snapshot_url, error = %e, "Failed to fetch coverage snapshot");
                return None;
            }
        };

        let measured = gaps::covered_commits(snapshot, &history, &self.pool.running_commits());
        gaps::find_gap(&history, &measured)
    }

    fn assign(&mut self, worker_id: u32, commit: &str, flavors: Flavors) -> Result<()> {
        let address = self
            .pool
            .get(worker_id)
            .ok_or(ControllerError::WorkerNotFound(worker_id))?
            .address
            .clone();
        let bench = BenchJob::new(
            worker_id,
            address.clone(),
            commit,
            flavors,
            self.config.remote.clone(),
        );
        let command = self.executor.describe(&address, &bench.bench_command());
        let ticket = self.pool.assign(worker_id, commit, command, Utc::now())?;

        let executor = self.executor.clone();
        self.spawn_job(worker_id, ticket, commit.to_string(), bench.run(executor));
        Ok(())
    }

    fn spawn_job<F>(&mut self, worker_id: u32, job: JobTicket, commit: String, operation: F)
    where
        F: Future<Output = Result<JobReport>> + Send + 'static,
    {
        self.running_jobs += 1;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(operation)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_error(panic)));
            let event = SchedulerEvent::WorkerDone {
                worker_id,
                job,
                commit,
                result,
            };
            if tx.send(event).is_err() {
                tracing::debug!(worker_id, "Controller gone, dropping job completion");
            }
        });
    }

    fn start_poll(&mut self, delay: Duration) {
        self.poll_delay = Some(delay);
        let poller = self.poller.clone();
        let last_queried = self.state.last_queried_commit.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(poller.poll_for_next_commit(delay, last_queried))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_error(panic)));
            if tx.send(SchedulerEvent::PollDone { result }).is_err() {
                tracing::debug!("Controller gone, dropping poll result");
            }
        });
    }

    fn log_time_since_dispatch(&self) {
        let since = self.state.since_last_dispatch(Utc::now());
        tracing::info!(
            since_last_dispatch_secs = since.map(|d| d.as_secs()),
            "Time since last benchmark dispatch"
        );
    }

    fn log_status(&self) {
        tracing::info!(
            runs = self.state.runs,
            jobs = self.running_jobs,
            polling = self.poll_delay.is_some(),
            queued = self.queue.len(),
            candidate = self.candidate.as_deref().unwrap_or("-"),
            workers = %self.pool.status_line(Utc::now()),
            "Pool status"
        );
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> ControllerError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ControllerError::Internal(format!("operation panicked: {message}"))
}

use chrono::{DateTime, Utc};

use crate::config::PoolConfig;
use crate::error::{ControllerError, Result};
use crate::storage::DocumentStore;
use crate::worker::state::{JobTicket, RestartRejection, Worker};

/// The fixed set of workers, ordered by ascending id.
///
/// Every mutation goes through the pool so the affected worker's document is
/// saved right after it changes.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    store: DocumentStore,
}

impl WorkerPool {
    /// Restore workers from their `node{id}.json` documents, or create a
    /// fresh pool when the store holds none.
    pub fn restore_or_create(store: DocumentStore, config: &PoolConfig) -> Result<Self> {
        let mut workers = Vec::new();
        for name in store.list(|name| Worker::id_from_document_name(name).is_some())? {
            if let Some(worker) = store.load::<Worker>(&name)? {
                tracing::info!(worker_id = worker.id, worker = %worker, "Worker restored");
                workers.push(worker);
            }
        }

        let mut pool = Self { workers, store };
        if pool.workers.is_empty() {
            let now = Utc::now();
            for id in 1..=config.size {
                let worker = Worker::new(id, config.address_for(id), now);
                pool.store.save(&Worker::document_name(id), &worker)?;
                pool.workers.push(worker);
            }
            tracing::info!(size = config.size, "Created worker pool");
        } else {
            tracing::info!(size = pool.workers.len(), "Restored worker pool");
        }

        pool.workers.sort_by_key(|w| w.id);
        Ok(pool)
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn get(&self, worker_id: u32) -> Option<&Worker> {
        self.workers.iter().find(|w| w.id == worker_id)
    }

    fn get_mut(&mut self, worker_id: u32) -> Result<&mut Worker> {
        self.workers
            .iter_mut()
            .find(|w| w.id == worker_id)
            .ok_or(ControllerError::WorkerNotFound(worker_id))
    }

    /// Lowest-id idle worker
    pub fn first_idle(&self) -> Option<u32> {
        self.workers.iter().find(|w| w.is_idle()).map(|w| w.id)
    }

    pub fn idle_ids(&self) -> Vec<u32> {
        self.workers
            .iter()
            .filter(|w| w.is_idle())
            .map(|w| w.id)
            .collect()
    }

    pub fn idle_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_idle()).count()
    }

    pub fn running(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter().filter(|w| w.is_running())
    }

    /// Commits currently being benchmarked
    pub fn running_commits(&self) -> Vec<String> {
        self.running().map(|w| w.last_commit.clone()).collect()
    }

    /// Put `commit` on a worker and persist it.
    pub fn assign(
        &mut self,
        worker_id: u32,
        commit: &str,
        command: String,
        now: DateTime<Utc>,
    ) -> Result<JobTicket> {
        let worker = self.get_mut(worker_id)?;
        let job = worker.begin(commit, command, now);
        tracing::info!(worker_id, commit, job = %job, "Job assigned");
        self.save(worker_id)?;
        Ok(job)
    }

    /// Mark the job finished. Returns false, leaving the worker untouched,
    /// when `job` no longer owns the worker.
    pub fn complete(&mut self, worker_id: u32, job: JobTicket, now: DateTime<Utc>) -> Result<bool> {
        let worker = self.get_mut(worker_id)?;
        if !worker.finish(job, now) {
            return Ok(false);
        }
        self.save(worker_id)?;
        Ok(true)
    }

    /// Returns false when the worker was idle already.
    pub fn force_idle(&mut self, worker_id: u32, now: DateTime<Utc>) -> Result<bool> {
        let worker = self.get_mut(worker_id)?;
        if !worker.force_idle(now) {
            return Ok(false);
        }
        self.save(worker_id)?;
        Ok(true)
    }

    /// Commit a restart directive would re-run on `worker_id`.
    pub fn restart_commit(&self, worker_id: u32) -> std::result::Result<String, RestartRejection> {
        self.get(worker_id)
            .ok_or(RestartRejection::UnknownWorker)?
            .restart_commit()
            .map(str::to_string)
    }

    fn save(&self, worker_id: u32) -> Result<()> {
        let worker = self
            .get(worker_id)
            .ok_or(ControllerError::WorkerNotFound(worker_id))?;
        self.store.save(&Worker::document_name(worker_id), worker)?;
        tracing::debug!(worker_id, worker = %worker, "Worker saved");
        Ok(())
    }

    /// One line with the status of every worker
    pub fn status_line(&self, now: DateTime<Utc>) -> String {
        self.workers
            .iter()
            .map(|w| w.status(now))
            .collect::<Vec<_>>()
            .join("  ")
    }
}

//! Benchmark workers and the operations run on them.
//!
//! - [`Worker`]: one remote slot and its idle/running state machine
//! - [`WorkerPool`]: the ordered, persisted set of workers
//! - [`RemoteExecutor`]: runs a command on a worker ([`SshExecutor`] in production)
//! - [`job`]: the benchmark run and the resume-after-restart log follower
//!
//! Job operations never touch worker state. They report back to the
//! controller, which applies the transition and saves the worker.

pub mod executor;
pub mod job;
pub mod pool;
pub mod state;

pub use executor::{ExecutionResult, LineAction, LineFilter, RemoteExecutor, SshExecutor};
pub use job::{BenchJob, Flavors, JobReport};
pub use pool::WorkerPool;
pub use state::{JobTicket, RestartRejection, Worker, WorkerState};

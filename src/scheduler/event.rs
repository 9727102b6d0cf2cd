use crate::error::Result;
use crate::worker::{JobReport, JobTicket};

/// Completion of an operation the controller started. Every spawned
/// operation sends exactly one of these.
#[derive(Debug)]
pub enum SchedulerEvent {
    WorkerDone {
        worker_id: u32,
        job: JobTicket,
        commit: String,
        result: Result<JobReport>,
    },
    PollDone {
        result: Result<String>,
    },
}

impl SchedulerEvent {
    pub fn is_poll(&self) -> bool {
        matches!(self, SchedulerEvent::PollDone { .. })
    }
}

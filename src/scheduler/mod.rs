//! Scheduling building blocks used by the [`Controller`](crate::controller::Controller) loop.

pub mod event;
pub mod gaps;
pub mod poller;
pub mod queue;
pub mod state;

pub use event::SchedulerEvent;
pub use gaps::{find_gap, CoverageGap};
pub use poller::CommitPoller;
pub use queue::WorkQueue;
pub use state::ControllerState;

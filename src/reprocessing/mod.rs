//! Reprocessing: tasks that re-derive existing documents after a config
//! change, the per sub-database tracker deciding when reprocessing is done,
//! and the runner executing them.

mod populate;
mod runner;
mod task;
mod tracker;

pub use populate::AttributePopulateTask;
pub use runner::{ReprocessingRunner, TaskRecord};
pub use task::{ReprocessingTask, TaskOutcome, TrackedTask};
pub use tracker::{ReprocessingTracker, TaskFailure, TaskTicket};

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::tracker::{ReprocessingTracker, TaskTicket};
use crate::error::Result;
use crate::serial::SerialNum;

/// How a reprocessing task ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    /// Cancelled or dropped before completion
    Abandoned,
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed => f.write_str("completed"),
            TaskOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            TaskOutcome::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// Work that re-derives existing data after a config change.
///
/// Tasks must be idempotent: a task interrupted by a crash is generated
/// again at startup and re-run from scratch.
pub trait ReprocessingTask: Send {
    fn description(&self) -> String;

    /// Serial of the config change that produced the task
    fn serial(&self) -> SerialNum;

    fn sub_db_id(&self) -> u32;

    /// Run to completion, or stop early with `Abandoned` once `cancel` is set.
    fn run(&mut self, cancel: &AtomicBool) -> Result<TaskOutcome>;
}

/// A task registered with its sub-database's tracker. Reports its outcome
/// when run; dropping it unrun reports it abandoned.
pub struct TrackedTask {
    inner: Box<dyn ReprocessingTask>,
    tracker: Arc<ReprocessingTracker>,
    ticket: Option<TaskTicket>,
}

impl TrackedTask {
    pub fn new(inner: Box<dyn ReprocessingTask>, tracker: Arc<ReprocessingTracker>) -> Self {
        let ticket = tracker.register(inner.serial(), inner.description());
        Self {
            inner,
            tracker,
            ticket: Some(ticket),
        }
    }

    pub fn boxed(self) -> Box<dyn ReprocessingTask> {
        Box::new(self)
    }
}

impl ReprocessingTask for TrackedTask {
    fn description(&self) -> String {
        self.inner.description()
    }

    fn serial(&self) -> SerialNum {
        self.inner.serial()
    }

    fn sub_db_id(&self) -> u32 {
        self.inner.sub_db_id()
    }

    fn run(&mut self, cancel: &AtomicBool) -> Result<TaskOutcome> {
        let result = self.inner.run(cancel);
        let outcome = match &result {
            Ok(outcome) => outcome.clone(),
            Err(e) => TaskOutcome::Failed(e.to_string()),
        };
        if let Some(ticket) = self.ticket.take() {
            self.tracker.finish(ticket, outcome);
        }
        result
    }
}

impl Drop for TrackedTask {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.tracker.finish(ticket, TaskOutcome::Abandoned);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::CountingTask;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(serial: SerialNum, fail: bool) -> Box<dyn ReprocessingTask> {
        Box::new(CountingTask {
            serial,
            runs: Arc::new(AtomicUsize::new(0)),
            fail,
        })
    }

    #[test]
    fn test_tracked_task_reports_outcome() {
        let tracker = Arc::new(ReprocessingTracker::new("ready"));
        let mut ok = TrackedTask::new(task(5, false), tracker.clone());
        let mut bad = TrackedTask::new(task(5, true), tracker.clone());
        assert_eq!(tracker.outstanding_at_or_before(5), 2);

        assert_eq!(ok.run(&AtomicBool::new(false)).unwrap(), TaskOutcome::Completed);
        assert!(bad.run(&AtomicBool::new(false)).is_err());
        assert_eq!(tracker.outstanding_at_or_before(5), 0);
        assert_eq!(tracker.failures().len(), 1);
        // Dropping after completion does not report twice
        drop(ok);
        drop(bad);
        assert_eq!(tracker.failures().len(), 1);
    }

    #[test]
    fn test_dropped_task_is_abandoned() {
        let tracker = Arc::new(ReprocessingTracker::new("ready"));
        let runs = Arc::new(AtomicUsize::new(0));
        let tracked = TrackedTask::new(
            Box::new(CountingTask {
                serial: 3,
                runs: runs.clone(),
                fail: false,
            }),
            tracker.clone(),
        );
        drop(tracked);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.outstanding_at_or_before(3), 0);
        assert_eq!(tracker.failures()[0].outcome, TaskOutcome::Abandoned);
    }
}

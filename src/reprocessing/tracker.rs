use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::task::TaskOutcome;
use crate::serial::SerialNum;

/// Handle for one registered task
#[derive(Debug, PartialEq, Eq)]
pub struct TaskTicket(u64);

/// A task that did not complete
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskFailure {
    pub description: String,
    pub serial: SerialNum,
    pub outcome: TaskOutcome,
}

#[derive(Default)]
struct TrackerState {
    next_id: u64,
    outstanding: BTreeMap<u64, (SerialNum, String)>,
    failures: Vec<TaskFailure>,
    /// Highest serial `on_reprocess_done` was requested for
    requested: Option<SerialNum>,
    /// Highest serial for which the done signal was accepted
    accepted: SerialNum,
}

impl TrackerState {
    fn outstanding_at_or_before(&self, serial: SerialNum) -> usize {
        self.outstanding.values().filter(|(s, _)| *s <= serial).count()
    }

    fn evaluate(&mut self, component: &str) {
        let Some(requested) = self.requested else {
            return;
        };
        if self.outstanding_at_or_before(requested) == 0 {
            self.accepted = self.accepted.max(requested);
            self.requested = None;
            info!(
                sub_db = component,
                serial = requested,
                failures = self.failures.len(),
                "Reprocessing done"
            );
        }
    }
}

/// Reprocessing bookkeeping of one sub-database: which tasks are still
/// outstanding and whether a done signal can be accepted.
pub struct ReprocessingTracker {
    component: String,
    state: Mutex<TrackerState>,
}

impl ReprocessingTracker {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn register(&self, serial: SerialNum, description: String) -> TaskTicket {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.outstanding.insert(id, (serial, description));
        TaskTicket(id)
    }

    pub fn finish(&self, ticket: TaskTicket, outcome: TaskOutcome) {
        let mut state = self.state.lock();
        let Some((serial, description)) = state.outstanding.remove(&ticket.0) else {
            return;
        };
        if !outcome.is_completed() {
            warn!(
                sub_db = %self.component,
                task = %description,
                serial,
                %outcome,
                "Reprocessing task did not complete"
            );
            state.failures.push(TaskFailure {
                description,
                serial,
                outcome,
            });
        }
        state.evaluate(&self.component);
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    pub fn outstanding_at_or_before(&self, serial: SerialNum) -> usize {
        self.state.lock().outstanding_at_or_before(serial)
    }

    /// Signal that all reprocessing queued at or before `serial` is done.
    /// Returns whether the signal is accepted now; a deferred signal is
    /// accepted as soon as the last matching task finishes.
    pub fn on_reprocess_done(&self, serial: SerialNum) -> bool {
        let mut state = self.state.lock();
        state.requested = Some(state.requested.map_or(serial, |r| r.max(serial)));
        state.evaluate(&self.component);
        state.accepted >= serial
    }

    pub fn accepted_serial(&self) -> SerialNum {
        self.state.lock().accepted
    }

    pub fn failures(&self) -> Vec<TaskFailure> {
        self.state.lock().failures.clone()
    }
}

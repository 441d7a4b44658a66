use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use super::task::{ReprocessingTask, TaskOutcome};
use crate::serial::SerialNum;

/// Worker records kept until taken; older ones are dropped first
const MAX_KEPT_RECORDS: usize = 1024;

/// What happened to one task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRecord {
    pub description: String,
    pub sub_db_id: u32,
    pub serial: SerialNum,
    pub outcome: TaskOutcome,
}

enum Job {
    Run(Box<dyn ReprocessingTask>),
    Shutdown,
}

#[derive(Default)]
struct RunnerState {
    pending: usize,
    records: VecDeque<TaskRecord>,
}

struct Shared {
    cancel: AtomicBool,
    state: Mutex<RunnerState>,
    idle: Condvar,
}

impl Shared {
    /// Run `task`; the record is kept for `take_records` when `keep` is set
    fn run_one(&self, mut task: Box<dyn ReprocessingTask>, keep: bool) -> TaskRecord {
        let description = task.description();
        let started = Instant::now();
        let outcome = match task.run(&self.cancel) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task = %description, error = %e, "Reprocessing task failed");
                TaskOutcome::Failed(e.to_string())
            }
        };
        info!(
            task = %description,
            sub_db_id = task.sub_db_id(),
            serial = task.serial(),
            %outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reprocessing task finished"
        );
        let record = TaskRecord {
            description,
            sub_db_id: task.sub_db_id(),
            serial: task.serial(),
            outcome,
        };
        drop(task);

        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        if keep {
            if state.records.len() == MAX_KEPT_RECORDS {
                state.records.pop_front();
            }
            state.records.push_back(record.clone());
        }
        if state.pending == 0 {
            self.idle.notify_all();
        }
        record
    }
}

/// Queue of reprocessing tasks. Tasks run either inline through
/// `run_pending` or on a background worker started with `start_worker`.
/// A failing task is recorded and never stops the rest of the queue.
pub struct ReprocessingRunner {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Default for ReprocessingRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ReprocessingRunner {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            shared: Arc::new(Shared {
                cancel: AtomicBool::new(false),
                state: Mutex::new(RunnerState::default()),
                idle: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn submit(&self, task: Box<dyn ReprocessingTask>) {
        debug!(task = %task.description(), serial = task.serial(), "Queued reprocessing task");
        self.shared.state.lock().pending += 1;
        if self.tx.send(Job::Run(task)).is_err() {
            self.shared.state.lock().pending -= 1;
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending
    }

    /// Run every queued task on the calling thread. The records are
    /// returned here and not kept.
    pub fn run_pending(&self) -> Vec<TaskRecord> {
        let mut records = Vec::new();
        while let Ok(job) = self.rx.try_recv() {
            match job {
                Job::Run(task) => records.push(self.shared.run_one(task, false)),
                Job::Shutdown => {
                    // Meant for the worker
                    let _ = self.tx.send(Job::Shutdown);
                    break;
                }
            }
        }
        records
    }

    /// Start a background worker draining the queue. No-op when running.
    pub fn start_worker(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let rx = self.rx.clone();
        let shared = self.shared.clone();
        *worker = Some(thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    Job::Run(task) => {
                        shared.run_one(task, true);
                    }
                    Job::Shutdown => break,
                }
            }
            debug!("Reprocessing worker stopped");
        }));
    }

    /// Block until no task is queued or running, or `timeout` passes.
    /// Returns whether the runner went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.pending > 0 {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.pending == 0;
            }
        }
        true
    }

    /// Records of tasks the worker finished since the last call, oldest
    /// first. At most the last 1024 are kept.
    pub fn take_records(&self) -> Vec<TaskRecord> {
        self.shared.state.lock().records.drain(..).collect()
    }

    /// Ask running and queued tasks to stop; they finish as abandoned
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    /// Cancel outstanding work and stop the worker
    pub fn shutdown(&self) {
        self.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = self.tx.send(Job::Shutdown);
            if handle.join().is_err() {
                error!("Reprocessing worker panicked");
            }
        }
        // Tasks still queued are dropped and reported abandoned
        while let Ok(job) = self.rx.try_recv() {
            if let Job::Run(task) = job {
                drop(task);
                let mut state = self.shared.state.lock();
                state.pending = state.pending.saturating_sub(1);
            }
        }
        self.shared.idle.notify_all();
    }
}

impl Drop for ReprocessingRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

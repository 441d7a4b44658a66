use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::history::HistoryState;
use super::owner_context::SubDbOwnerContext;
use super::{CONFIG_FILE, HISTORY_FILE};
use crate::error::{DocDbError, Result};
use crate::feed::FeedView;
use crate::models::{DbDocumentId, Document, DocumentId, FeedOperation, FeedRecord};
use crate::owner::{FeedHandlerOwner, SubDbOwner};
use crate::reconfig::{ConfigSnapshot, ReconfigParams};
use crate::reprocessing::{ReprocessingRunner, ReprocessingTask};
use crate::schema::Schema;
use crate::serial::SerialNum;
use crate::subdb::{
    DocumentSubDb, WipeOutcome, NOTREADY_SUB_DB_ID, READY_SUB_DB_ID, REMOVED_SUB_DB_ID,
};

/// Lifecycle of a document database
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocDbState {
    Loading,
    Replaying,
    /// Replay done, rerunning reprocessing interrupted by the last shutdown
    RedoReprocess,
    Online,
    /// A logged operation could not be applied everywhere; only `close`
    /// is allowed
    Failed,
    Closed,
}

impl fmt::Display for DocDbState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Sub-databases that hold live documents
const LIVE_SUB_DBS: [u32; 2] = [READY_SUB_DB_ID, NOTREADY_SUB_DB_ID];

/// State shared between the document database and its feed handler
pub(super) struct DocDbInner {
    pub(super) name: String,
    pub(super) db_dir: PathBuf,
    /// Indexed by sub-database id
    pub(super) sub_dbs: Vec<Box<dyn DocumentSubDb>>,
    pub(super) owner_ctx: Arc<SubDbOwnerContext>,
    pub(super) active_config: ArcSwap<ConfigSnapshot>,
    pub(super) history: Mutex<HistoryState>,
    pub(super) state: Mutex<DocDbState>,
    pub(super) rejected_config: AtomicBool,
    pub(super) runner: ReprocessingRunner,
    pub(super) startup_tasks: Mutex<Vec<Box<dyn ReprocessingTask>>>,
    /// Serial the next reprocessing done signal refers to
    pub(super) reprocess_serial: AtomicU64,
    wipe_serial: AtomicU64,
    last_wipe: Mutex<Option<WipeOutcome>>,
}

impl DocDbInner {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        name: String,
        db_dir: PathBuf,
        sub_dbs: Vec<Box<dyn DocumentSubDb>>,
        owner_ctx: Arc<SubDbOwnerContext>,
        snapshot: Arc<ConfigSnapshot>,
        history: HistoryState,
        startup_tasks: Vec<Box<dyn ReprocessingTask>>,
    ) -> Self {
        Self {
            reprocess_serial: AtomicU64::new(snapshot.serial),
            name,
            db_dir,
            sub_dbs,
            owner_ctx,
            active_config: ArcSwap::new(snapshot),
            history: Mutex::new(history),
            state: Mutex::new(DocDbState::Loading),
            rejected_config: AtomicBool::new(false),
            runner: ReprocessingRunner::new(),
            startup_tasks: Mutex::new(startup_tasks),
            wipe_serial: AtomicU64::new(0),
            last_wipe: Mutex::new(None),
        }
    }

    pub(super) fn state(&self) -> DocDbState {
        *self.state.lock()
    }

    pub(super) fn set_state(&self, to: DocDbState) {
        let mut state = self.state.lock();
        debug!(docdb = %self.name, from = %*state, to = %to, "Document database state");
        *state = to;
    }

    pub(super) fn sub_db(&self, id: u32) -> Option<&dyn DocumentSubDb> {
        self.sub_dbs.get(id as usize).map(|s| s.as_ref())
    }

    fn feed_view(&self, sub_db: &dyn DocumentSubDb) -> Result<Arc<dyn FeedView>> {
        sub_db.get_feed_view().ok_or_else(|| {
            DocDbError::protocol(
                &self.name,
                format!("sub-database {} has no feed view", sub_db.name()),
            )
        })
    }

    fn locate_in(&self, sub_db_id: u32, id: &DocumentId) -> Option<DbDocumentId> {
        let meta = self.sub_db(sub_db_id)?.get_document_meta_store_context()?;
        meta.get_lid(id).map(|lid| DbDocumentId::new(sub_db_id, lid))
    }

    /// Where a live (not removed) document is stored
    pub(super) fn locate_live(&self, id: &DocumentId) -> Option<DbDocumentId> {
        LIVE_SUB_DBS.iter().find_map(|sub_db_id| self.locate_in(*sub_db_id, id))
    }

    /// Placement a write of `id` into `sub_db_id` gets right now
    fn place(&self, sub_db_id: u32, id: &DocumentId) -> Result<DbDocumentId> {
        let meta = self
            .sub_db(sub_db_id)
            .and_then(|s| s.get_document_meta_store_context())
            .ok_or_else(|| {
                DocDbError::protocol(&self.name, format!("sub-database {} is not loaded", sub_db_id))
            })?;
        Ok(DbDocumentId::new(sub_db_id, meta.peek_lid(id)))
    }

    /// Tell every sub-database that reprocessing up to `serial` is done.
    /// Returns whether all of them accepted the signal.
    pub(super) fn signal_reprocess_done(&self, serial: SerialNum) -> Result<bool> {
        let mut accepted = true;
        for sub_db in &self.sub_dbs {
            accepted &= sub_db.on_reprocess_done(serial)?;
        }
        Ok(accepted)
    }

    /// Switch every sub-database to `new`, committed at `serial`. Runs under
    /// the feed handler's lock. Returns the number of queued tasks.
    pub(super) fn apply_config_at(
        &self,
        serial: SerialNum,
        new: ConfigSnapshot,
        old: &Arc<ConfigSnapshot>,
        params: &ReconfigParams,
    ) -> Result<usize> {
        let new = Arc::new(new.with_serial(serial));
        let mut tasks = Vec::new();
        for sub_db in &self.sub_dbs {
            tasks.extend(sub_db.apply_config(&new, old, serial, params)?);
        }

        let mut history = self.history.lock();
        let updated = history.after_change(&old.schema, &new.schema, serial);
        if updated != *history {
            updated.save(&self.db_dir.join(HISTORY_FILE))?;
            *history = updated;
        }
        for sub_db in &self.sub_dbs {
            sub_db.set_index_schema(&new.schema, &history.schema)?;
        }
        drop(history);

        new.save(&self.db_dir.join(CONFIG_FILE))?;
        self.active_config.store(new.clone());
        self.reprocess_serial.fetch_max(serial, Ordering::SeqCst);

        let queued = tasks.len();
        for task in tasks {
            self.runner.submit(task);
        }
        info!(
            docdb = %self.name,
            serial,
            generation = new.generation,
            tasks = queued,
            "Config applied"
        );
        Ok(queued)
    }

    /// Drop history data in every sub-database, all or nothing
    pub(super) fn wipe_history_at(&self, serial: SerialNum) -> Result<WipeOutcome> {
        // Held until every sub-database is wiped so the permission cannot flip midway
        let allow_prune = self.owner_ctx.hold_prune_decision();
        if !*allow_prune {
            return Ok(WipeOutcome::Denied);
        }
        let mut history = self.history.lock();
        if history.is_empty() {
            return Ok(WipeOutcome::Applied { wiped: Vec::new() });
        }
        for sub_db in &self.sub_dbs {
            let outstanding = sub_db.reprocessing_tracker().outstanding_at_or_before(serial);
            if outstanding > 0 {
                warn!(
                    docdb = %self.name,
                    sub_db = sub_db.name(),
                    serial,
                    outstanding,
                    "History wipe blocked by reprocessing"
                );
                return Ok(WipeOutcome::BlockedByReprocessing);
            }
        }

        let mut wiped = Vec::new();
        for (done, sub_db) in self.sub_dbs.iter().enumerate() {
            match sub_db.wipe_history(serial, &Schema::new(), &history.schema)? {
                WipeOutcome::Applied { wiped: names } => wiped.extend(names),
                refused if done == 0 => return Ok(refused),
                refused => {
                    return Err(DocDbError::Internal(format!(
                        "{} refused history wipe ({:?}) after {} sub-databases were wiped",
                        sub_db.name(),
                        refused,
                        done
                    )))
                }
            }
        }
        let active = self.active_config.load_full();
        for sub_db in &self.sub_dbs {
            sub_db.set_index_schema(&active.schema, &Schema::new())?;
        }
        let cleared = HistoryState {
            serial,
            schema: Schema::new(),
        };
        cleared.save(&self.db_dir.join(HISTORY_FILE))?;
        info!(
            docdb = %self.name,
            serial,
            fields = ?history.schema.field_names(),
            "History wiped"
        );
        *history = cleared;
        drop(allow_prune);
        wiped.sort();
        wiped.dedup();
        Ok(WipeOutcome::Applied { wiped })
    }

    pub(super) fn take_last_wipe(&self) -> Option<WipeOutcome> {
        self.last_wipe.lock().take()
    }
}

impl FeedHandlerOwner for DocDbInner {
    fn prepare_operation(&self, serial: SerialNum, op: FeedOperation) -> Result<FeedRecord> {
        let (target, previous) = match &op {
            FeedOperation::Put(doc) => match self.locate_live(&doc.id) {
                // Rewritten in place, wherever it lives
                Some(live) => (Some(live), None),
                None => (
                    Some(self.place(READY_SUB_DB_ID, &doc.id)?),
                    self.locate_in(REMOVED_SUB_DB_ID, &doc.id),
                ),
            },
            FeedOperation::Update { id, .. } => {
                let live = self
                    .locate_live(id)
                    .ok_or_else(|| DocDbError::DocumentNotFound(id.to_string()))?;
                (Some(live), None)
            }
            FeedOperation::Remove(id) => (
                Some(self.place(REMOVED_SUB_DB_ID, id)?),
                self.locate_live(id),
            ),
            FeedOperation::Move {
                doc,
                from_sub_db,
                to_sub_db,
            } => {
                if from_sub_db == to_sub_db
                    || !LIVE_SUB_DBS.contains(from_sub_db)
                    || !LIVE_SUB_DBS.contains(to_sub_db)
                {
                    return Err(DocDbError::InvalidOperation(format!(
                        "cannot move {} from sub-database {} to {}",
                        doc.id, from_sub_db, to_sub_db
                    )));
                }
                let previous = self
                    .locate_in(*from_sub_db, &doc.id)
                    .ok_or_else(|| DocDbError::DocumentNotFound(doc.id.to_string()))?;
                (Some(self.place(*to_sub_db, &doc.id)?), Some(previous))
            }
            FeedOperation::WipeHistory | FeedOperation::NoOp => (None, None),
        };
        let mut record = FeedRecord::new(serial, op).with_previous(previous);
        record.target = target;
        Ok(record)
    }

    fn apply_operation(&self, record: &FeedRecord, replaying: bool) -> Result<()> {
        let serial = record.serial;
        if !replaying && matches!(record.op, FeedOperation::WipeHistory) {
            self.wipe_serial.store(serial, Ordering::SeqCst);
        }
        for sub_db in &self.sub_dbs {
            let view = self.feed_view(sub_db.as_ref())?;
            let here = |placement: Option<DbDocumentId>| {
                placement
                    .filter(|p| p.sub_db_id == sub_db.sub_db_id())
                    .map(|p| p.lid)
            };
            match (&record.op, here(record.target), here(record.previous)) {
                (FeedOperation::Put(doc), Some(lid), _)
                | (FeedOperation::Move { doc, .. }, Some(lid), _) => {
                    view.handle_put(serial, lid, doc)?
                }
                (FeedOperation::Update { id, update }, Some(lid), _) => {
                    view.handle_update(serial, lid, id, update)?
                }
                (FeedOperation::Remove(id), Some(lid), _) => {
                    let tombstone = Document {
                        id: id.clone(),
                        fields: Default::default(),
                        timestamp: 0,
                    };
                    view.handle_put(serial, lid, &tombstone)?
                }
                (op, None, Some(lid)) => match op.document_id() {
                    Some(id) => view.handle_remove(serial, lid, id)?,
                    None => view.handle_noop(serial)?,
                },
                _ => view.handle_noop(serial)?,
            }
        }
        Ok(())
    }

    fn perform_wipe_history(&self) -> Result<()> {
        let serial = self.wipe_serial.load(Ordering::SeqCst);
        let outcome = self.wipe_history_at(serial)?;
        *self.last_wipe.lock() = Some(outcome);
        Ok(())
    }

    fn on_transaction_log_replay_done(&self) -> Result<()> {
        for sub_db in &self.sub_dbs {
            sub_db.on_replay_done()?;
        }
        Ok(())
    }

    fn has_pending_reprocessing(&self) -> bool {
        !self.startup_tasks.lock().is_empty()
            || self.runner.pending() > 0
            || self.sub_dbs.iter().any(|s| s.has_pending_reprocessing())
    }

    fn enter_redo_reprocess_state(&self) -> Result<()> {
        self.set_state(DocDbState::RedoReprocess);
        let tasks = std::mem::take(&mut *self.startup_tasks.lock());
        info!(docdb = %self.name, tasks = tasks.len(), "Redoing interrupted reprocessing");
        for task in tasks {
            self.runner.submit(task);
        }
        let records = self.runner.run_pending();
        let failed = records.iter().filter(|r| !r.outcome.is_completed()).count();

        let serial = self
            .sub_dbs
            .iter()
            .map(|s| s.last_serial())
            .max()
            .unwrap_or(0);
        let accepted = self.signal_reprocess_done(serial)?;
        info!(
            docdb = %self.name,
            tasks = records.len(),
            failed,
            serial,
            accepted,
            "Redo reprocessing done"
        );
        Ok(())
    }

    fn on_perform_prune(&self, flushed_serial: SerialNum) -> Result<()> {
        let pending_serial = {
            let history = self.history.lock();
            (!history.is_empty()).then_some(history.serial)
        };
        // History whose removal is flushed everywhere is no longer needed
        if let Some(serial) = pending_serial.filter(|s| *s <= flushed_serial) {
            let outcome = self.wipe_history_at(flushed_serial)?;
            debug!(docdb = %self.name, flushed_serial, history_serial = serial, ?outcome, "Wipe after prune");
        }
        Ok(())
    }

    fn is_feed_blocked_by_rejected_config(&self) -> bool {
        self.rejected_config.load(Ordering::SeqCst)
    }

    fn get_allow_prune(&self) -> bool {
        self.owner_ctx.get_allow_prune()
    }

    fn on_feed_aborted(&self, serial: SerialNum, error: &DocDbError) {
        error!(docdb = %self.name, serial, error = %error, "Feed aborted, document database failed");
        self.runner.cancel();
        self.set_state(DocDbState::Failed);
    }
}

//! The document database: owner of the ready, removed and not-ready
//! sub-databases and of the feed handler writing to them.
//!
//! `DocumentDb::open` loads every sub-database in parallel, replays the
//! transaction log from the oldest flushed serial, reruns reprocessing
//! interrupted by the last shutdown, then accepts feed. Config changes are
//! committed through the feed handler so they get a serial of their own.

mod history;
mod inner;
mod owner_context;

pub use history::HistoryState;
pub use inner::DocDbState;
pub use owner_context::SubDbOwnerContext;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use self::inner::DocDbInner;
use crate::config::DocDbConfig;
use crate::error::{DocDbError, Result};
use crate::feed::{FeedHandler, FeedOutcome, PruneOutcome, ReplayStats};
use crate::flush::{FlushStats, FlushTargetList};
use crate::models::{Document, DocumentId, DocumentUpdate, FeedOperation};
use crate::owner::FeedHandlerOwner;
use crate::reconfig::{ConfigSnapshot, ReconfigParams};
use crate::reprocessing::{TaskFailure, TaskRecord};
use crate::schema::Schema;
use crate::search::SessionManager;
use crate::serial::SerialNum;
use crate::subdb::{
    newest_flushed_serial_of, oldest_flushed_serial_of, DocumentSubDb, StoreSubDb, SubDbType,
    WipeOutcome, READY_SUB_DB_ID,
};
use crate::tlog::TlogStats;

/// Active config snapshot, next to the sub-database directories
pub(crate) const CONFIG_FILE: &str = "config.json";
/// Fields removed from the config but not yet wiped
pub(crate) const HISTORY_FILE: &str = "history.json";

/// Result of offering a new config snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconfigOutcome {
    /// Committed at `serial`; `tasks` reprocessing tasks were queued
    Applied { serial: SerialNum, tasks: usize },
    /// Nothing differs from the active config
    Unchanged,
    /// Cannot be applied to live data; feed stays blocked until a
    /// compatible config arrives
    Rejected { reason: String },
}

/// What a flush round did
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlushReport {
    pub target_serial: SerialNum,
    pub flushed: Vec<FlushStats>,
    /// Names of targets whose flush failed; their bounds are unchanged
    pub failed: Vec<String>,
    pub prune: PruneOutcome,
}

pub struct DocumentDb {
    config: DocDbConfig,
    inner: Arc<DocDbInner>,
    feed: FeedHandler,
    sessions: Arc<SessionManager>,
    replay: ReplayStats,
}

impl DocumentDb {
    /// Open the document database below `config.db_dir()`. `initial` is
    /// only used when no config has been persisted yet; a persisted config
    /// wins, newer ones go through `apply_config`.
    pub fn open(config: DocDbConfig, initial: ConfigSnapshot) -> Result<Self> {
        let started = Instant::now();
        let db_dir = config.db_dir();
        fs::create_dir_all(&db_dir)?;

        let config_path = db_dir.join(CONFIG_FILE);
        let snapshot = match ConfigSnapshot::load(&config_path)? {
            Some(persisted) => {
                if persisted.generation != initial.generation {
                    debug!(
                        docdb = %config.name,
                        persisted = persisted.generation,
                        offered = initial.generation,
                        "Resuming with persisted config"
                    );
                }
                persisted
            }
            None => {
                initial.save(&config_path)?;
                initial
            }
        };
        let snapshot = Arc::new(snapshot);
        let history = HistoryState::load(&db_dir.join(HISTORY_FILE))?.unwrap_or_default();

        let owner_ctx = Arc::new(SubDbOwnerContext::new(
            config.name.clone(),
            config.distribution_key,
            config.allow_prune,
        ));
        let sub_dbs: Vec<Box<dyn DocumentSubDb>> = SubDbType::all()
            .into_iter()
            .map(|ty| {
                Box::new(StoreSubDb::new(
                    ty,
                    &db_dir,
                    owner_ctx.clone(),
                    config.index_factory.clone(),
                )) as Box<dyn DocumentSubDb>
            })
            .collect();

        initialize_sub_dbs(&sub_dbs, &snapshot, &history.schema, &config)?;

        let sessions = Arc::new(SessionManager::new());
        let mut startup_tasks = Vec::new();
        for sub_db in &sub_dbs {
            sub_db.init_views(snapshot.clone(), sessions.clone())?;
            sub_db.set_index_schema(&snapshot.schema, &history.schema)?;
            startup_tasks.extend(sub_db.take_reprocessing_tasks());
        }

        let inner = Arc::new(DocDbInner::new(
            config.name.clone(),
            db_dir,
            sub_dbs,
            owner_ctx,
            snapshot,
            history,
            startup_tasks,
        ));
        let feed = FeedHandler::open(config.tlog_dir(), inner.clone())?;

        let newest_flushed = newest_flushed_serial_of(&inner.sub_dbs);
        let last_logged = feed.tlog_last_serial();
        if newest_flushed > last_logged {
            error!(
                docdb = %config.name,
                newest_flushed,
                last_logged,
                "Flushed state is newer than the transaction log"
            );
            return Err(DocDbError::LogTailLost {
                newest_flushed,
                last_logged,
            });
        }

        let oldest_flushed = oldest_flushed_serial_of(&inner.sub_dbs);
        let pruned = feed.prune_serial();
        if oldest_flushed < pruned {
            error!(
                docdb = %config.name,
                oldest_flushed,
                pruned,
                "Flushed state is older than the start of the transaction log"
            );
            return Err(DocDbError::LogHeadLost {
                needed_from: oldest_flushed,
                pruned,
            });
        }

        inner.set_state(DocDbState::Replaying);
        let replay = feed.replay(oldest_flushed)?;
        inner.set_state(DocDbState::Online);
        if config.background_reprocessing {
            inner.runner.start_worker();
        }

        info!(
            docdb = %config.name,
            replayed = replay.records,
            last_serial = feed.last_serial(),
            docs = inner.sub_dbs.iter().map(|s| s.get_num_docs()).sum::<usize>(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document database online"
        );
        Ok(Self {
            config,
            inner,
            feed,
            sessions,
            replay,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DocDbConfig {
        &self.config
    }

    pub fn state(&self) -> DocDbState {
        self.inner.state()
    }

    /// What the startup replay did
    pub fn replay_stats(&self) -> ReplayStats {
        self.replay
    }

    fn require_online(&self, op: &str) -> Result<()> {
        match self.inner.state() {
            DocDbState::Online => Ok(()),
            state => Err(DocDbError::protocol(
                &self.config.name,
                format!("{} not allowed in state {}", op, state),
            )),
        }
    }

    // Feed

    pub fn feed(&self, op: FeedOperation) -> Result<FeedOutcome> {
        self.require_online("feed")?;
        self.feed.perform_operation(op)
    }

    pub fn put(&self, doc: Document) -> Result<FeedOutcome> {
        self.feed(FeedOperation::Put(doc))
    }

    pub fn update(&self, id: impl Into<DocumentId>, update: DocumentUpdate) -> Result<FeedOutcome> {
        self.feed(FeedOperation::Update {
            id: id.into(),
            update,
        })
    }

    pub fn remove(&self, id: impl Into<DocumentId>) -> Result<FeedOutcome> {
        self.feed(FeedOperation::Remove(id.into()))
    }

    /// Move a live document to the ready or not-ready sub-database
    pub fn move_document(&self, id: &DocumentId, to: SubDbType) -> Result<FeedOutcome> {
        let from = self
            .inner
            .locate_live(id)
            .ok_or_else(|| DocDbError::DocumentNotFound(id.to_string()))?;
        let doc = self
            .get_document(id)?
            .ok_or_else(|| DocDbError::DocumentNotFound(id.to_string()))?;
        self.feed(FeedOperation::Move {
            doc,
            from_sub_db: from.sub_db_id,
            to_sub_db: to.id(),
        })
    }

    pub fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
        let Some(location) = self.inner.locate_live(id) else {
            return Ok(None);
        };
        let sub_db = self.sub_db(location.sub_db_id).ok_or_else(|| {
            DocDbError::Internal(format!("no sub-database {}", location.sub_db_id))
        })?;
        Ok(sub_db.get_document_retriever()?.get_document(id))
    }

    /// Searchable documents whose indexed `field` contains `term`
    pub fn match_term(&self, rank_profile: &str, field: &str, term: &str) -> Result<Vec<DocumentId>> {
        let view = self
            .sub_db(READY_SUB_DB_ID)
            .and_then(|s| s.get_search_view())
            .ok_or_else(|| DocDbError::protocol(&self.config.name, "no search view"))?;
        view.match_term(rank_profile, field, term)
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn sync(&self) -> Result<()> {
        self.feed.sync()
    }

    // Config and reprocessing

    /// Offer a new config snapshot. A compatible snapshot unblocks feed
    /// that a rejected one blocked.
    pub fn apply_config(&self, new: ConfigSnapshot) -> Result<ReconfigOutcome> {
        self.require_online("apply_config")?;
        let old = self.inner.active_config.load_full();
        let params = ReconfigParams::new(&old, &new);
        if params.requires_restart() {
            let reason = format!(
                "document type {} -> {} needs a restart",
                old.doc_type, new.doc_type
            );
            self.inner.rejected_config.store(true, Ordering::SeqCst);
            warn!(
                docdb = %self.config.name,
                generation = new.generation,
                %reason,
                "Rejected config, feed blocked"
            );
            return Ok(ReconfigOutcome::Rejected { reason });
        }
        if self.inner.rejected_config.swap(false, Ordering::SeqCst) {
            info!(docdb = %self.config.name, generation = new.generation, "Feed unblocked");
        }
        if !params.config_has_changed() {
            debug!(docdb = %self.config.name, generation = new.generation, "Config unchanged");
            return Ok(ReconfigOutcome::Unchanged);
        }

        let inner = &self.inner;
        let (serial, tasks) = self
            .feed
            .commit_config_change(|serial| inner.apply_config_at(serial, new, &old, &params))?;
        Ok(ReconfigOutcome::Applied { serial, tasks })
    }

    pub fn active_config(&self) -> Arc<ConfigSnapshot> {
        self.inner.active_config.load_full()
    }

    /// Fields removed from the config whose data is still kept
    pub fn history_schema(&self) -> Schema {
        self.inner.history.lock().schema.clone()
    }

    pub fn is_feed_blocked(&self) -> bool {
        self.inner.is_feed_blocked_by_rejected_config()
    }

    /// Run queued reprocessing on the calling thread, then signal that
    /// reprocessing for the last committed config is done.
    pub fn run_reprocessing(&self) -> Result<Vec<TaskRecord>> {
        let records = self.inner.runner.run_pending();
        let serial = self.inner.reprocess_serial.load(Ordering::SeqCst);
        let accepted = self.inner.signal_reprocess_done(serial)?;
        debug!(docdb = %self.config.name, tasks = records.len(), serial, accepted, "Ran reprocessing");
        Ok(records)
    }

    /// Wait for the background worker to drain the queue. Returns whether
    /// every sub-database accepted the done signal within `timeout`.
    pub fn wait_for_reprocessing(&self, timeout: Duration) -> Result<bool> {
        if !self.inner.runner.wait_idle(timeout) {
            return Ok(false);
        }
        let records = self.inner.runner.take_records();
        let failed = records.iter().filter(|r| !r.outcome.is_completed()).count();
        if failed > 0 {
            warn!(docdb = %self.config.name, tasks = records.len(), failed, "Background reprocessing had failures");
        }
        let serial = self.inner.reprocess_serial.load(Ordering::SeqCst);
        self.inner.signal_reprocess_done(serial)
    }

    pub fn pending_reprocessing(&self) -> usize {
        self.inner.runner.pending()
    }

    /// Tasks that failed or were abandoned, over all sub-databases
    pub fn reprocessing_failures(&self) -> Vec<TaskFailure> {
        self.inner
            .sub_dbs
            .iter()
            .flat_map(|s| s.reprocessing_tracker().failures())
            .collect()
    }

    // Flush and prune

    /// Flush every target up to the last serial, then prune the
    /// transaction log.
    pub fn flush(&self) -> Result<FlushReport> {
        let targets = self.flush_targets();
        self.flush_targets_and_prune(targets)
    }

    /// Flush the targets whose unflushed state exceeds the flush profile
    /// threshold, then prune.
    pub fn flush_if_needed(&self) -> Result<FlushReport> {
        let threshold = self.config.flush_profile.flush_threshold_bytes();
        let targets = self
            .flush_targets()
            .into_iter()
            .filter(|t| t.approx_memory_gain() >= threshold)
            .collect();
        self.flush_targets_and_prune(targets)
    }

    pub fn flush_targets(&self) -> FlushTargetList {
        self.inner
            .sub_dbs
            .iter()
            .flat_map(|s| s.get_flush_targets())
            .collect()
    }

    fn flush_targets_and_prune(&self, targets: FlushTargetList) -> Result<FlushReport> {
        self.require_online("flush")?;
        // Flushed state must never get ahead of the durable log
        self.feed.sync()?;
        let serial = self.feed.last_serial();
        let started = Instant::now();

        let chunk_size = targets
            .len()
            .div_ceil(self.config.worker_threads.max(1))
            .max(1);
        let results: Vec<(String, Result<FlushStats>)> = thread::scope(|scope| {
            let handles: Vec<_> = targets
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|t| (t.name().to_string(), t.flush(serial)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| match h.join() {
                    Ok(results) => results,
                    Err(_) => {
                        error!("Flush worker panicked");
                        Vec::new()
                    }
                })
                .collect()
        });

        let mut flushed = Vec::new();
        let mut failed = Vec::new();
        for (name, result) in results {
            match result {
                Ok(stats) => flushed.push(stats),
                Err(e) => {
                    warn!(target = %name, error = %e, "Flush failed");
                    failed.push(name);
                }
            }
        }
        let prune = self.prune()?;
        info!(
            docdb = %self.config.name,
            target_serial = serial,
            flushed = flushed.len(),
            failed = failed.len(),
            oldest_flushed = self.oldest_flushed_serial(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Flush done"
        );
        Ok(FlushReport {
            target_serial: serial,
            flushed,
            failed,
            prune,
        })
    }

    /// Prune the transaction log up to the oldest flushed serial
    pub fn prune(&self) -> Result<PruneOutcome> {
        self.require_online("prune")?;
        self.feed.prune(self.oldest_flushed_serial())
    }

    /// Log a history wipe and drop history data in every sub-database
    pub fn wipe_history(&self) -> Result<WipeOutcome> {
        self.require_online("wipe_history")?;
        if !self.inner.get_allow_prune() {
            debug!(docdb = %self.config.name, "History wipe denied");
            return Ok(WipeOutcome::Denied);
        }
        match self.feed.perform_operation(FeedOperation::WipeHistory)? {
            FeedOutcome::Accepted(_) => Ok(self
                .inner
                .take_last_wipe()
                .unwrap_or(WipeOutcome::Applied { wiped: Vec::new() })),
            FeedOutcome::Rejected { reason } => {
                warn!(docdb = %self.config.name, %reason, "History wipe rejected");
                Ok(WipeOutcome::Denied)
            }
        }
    }

    pub fn set_allow_prune(&self, allow: bool) {
        self.inner.owner_ctx.set_allow_prune(allow);
    }

    // Serials and statistics

    pub fn last_serial(&self) -> SerialNum {
        self.feed.last_serial()
    }

    pub fn oldest_flushed_serial(&self) -> SerialNum {
        oldest_flushed_serial_of(&self.inner.sub_dbs)
    }

    pub fn newest_flushed_serial(&self) -> SerialNum {
        newest_flushed_serial_of(&self.inner.sub_dbs)
    }

    pub fn prune_serial(&self) -> SerialNum {
        self.feed.prune_serial()
    }

    pub fn tlog_stats(&self) -> Result<TlogStats> {
        self.feed.tlog_stats()
    }

    /// Live documents, searchable or not
    pub fn num_docs(&self) -> usize {
        self.inner
            .sub_dbs
            .iter()
            .filter(|s| s.sub_db_type() != SubDbType::Removed)
            .map(|s| s.get_num_docs())
            .sum()
    }

    pub fn num_active_docs(&self) -> usize {
        self.inner.sub_dbs.iter().map(|s| s.get_num_active_docs()).sum()
    }

    pub fn sub_db(&self, id: u32) -> Option<&dyn DocumentSubDb> {
        self.inner.sub_db(id)
    }

    pub fn sub_dbs(&self) -> impl Iterator<Item = &dyn DocumentSubDb> {
        self.inner.sub_dbs.iter().map(|s| s.as_ref())
    }

    pub fn owner_context(&self) -> &Arc<SubDbOwnerContext> {
        &self.inner.owner_ctx
    }

    /// Stop reprocessing, sync the log and close every sub-database
    pub fn close(&self) -> Result<()> {
        if self.inner.state() == DocDbState::Closed {
            return Err(DocDbError::protocol(&self.config.name, "closed twice"));
        }
        self.inner.set_state(DocDbState::Closed);
        self.inner.runner.shutdown();
        let mut result = self.feed.sync();
        for sub_db in &self.inner.sub_dbs {
            if let Err(e) = sub_db.close() {
                warn!(sub_db = sub_db.name(), error = %e, "Failed to close sub-database");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        info!(docdb = %self.config.name, last_serial = self.feed.last_serial(), "Document database closed");
        result
    }
}

impl Drop for DocumentDb {
    fn drop(&mut self) {
        if self.inner.state() != DocDbState::Closed {
            if let Err(e) = self.close() {
                warn!(docdb = %self.config.name, error = %e, "Close on drop failed");
            }
        }
    }
}

/// Plan every sub-database, load them in parallel, then install the
/// results on this thread.
fn initialize_sub_dbs(
    sub_dbs: &[Box<dyn DocumentSubDb>],
    snapshot: &ConfigSnapshot,
    history: &Schema,
    config: &DocDbConfig,
) -> Result<()> {
    let union_schema = snapshot.schema.union(history);
    let initializers = sub_dbs
        .iter()
        .map(|s| {
            s.create_initializer(
                snapshot,
                snapshot.serial,
                &union_schema,
                &config.summary,
                &config.index,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = initializers
            .into_iter()
            .map(|init| scope.spawn(move || init.run()))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(DocDbError::Internal("sub-database initializer panicked".to_string()))
                })
            })
            .collect()
    });
    for (sub_db, result) in sub_dbs.iter().zip(results) {
        sub_db.setup(result?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, FieldSpec};
    use crate::subdb::{NOTREADY_SUB_DB_ID, REMOVED_SUB_DB_ID};
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> DocDbConfig {
        DocDbConfig::new("music", tmp.path().to_path_buf(), 0)
            .with_worker_threads(2)
            .with_background_reprocessing(false)
    }

    fn schema() -> Schema {
        Schema::new()
            .field("title", FieldSpec::text())
            .field("year", FieldSpec::attribute(DataType::Int64))
    }

    fn song(id: &str, title: &str) -> Document {
        Document::new(id).with_field("title", title).with_field("year", 1999i64)
    }

    #[test]
    fn test_put_update_remove_placement() {
        let tmp = TempDir::new().unwrap();
        let db = DocumentDb::open(config(&tmp), ConfigSnapshot::new(1, "music", schema())).unwrap();
        assert_eq!(db.state(), DocDbState::Online);

        db.put(song("id:1", "blue moon")).unwrap();
        db.put(song("id:2", "red sky")).unwrap();
        assert_eq!(db.num_docs(), 2);
        assert_eq!(db.match_term("default", "title", "moon").unwrap().len(), 1);

        db.update("id:1", DocumentUpdate::new().assign("title", "green moon"))
            .unwrap();
        let doc = db.get_document(&DocumentId::new("id:1")).unwrap().unwrap();
        assert_eq!(doc.get("title").and_then(|v| v.as_text()), Some("green moon"));

        db.remove("id:2").unwrap();
        assert_eq!(db.num_docs(), 1);
        let removed = db.sub_db(REMOVED_SUB_DB_ID).unwrap();
        assert!(removed.has_document(&DocumentId::new("id:2")));

        // Re-put drops the tombstone
        db.put(song("id:2", "red sky")).unwrap();
        assert!(!removed.has_document(&DocumentId::new("id:2")));
        assert_eq!(db.last_serial(), 5);

        assert!(matches!(
            db.update("id:9", DocumentUpdate::new().assign("title", "x")),
            Err(DocDbError::DocumentNotFound(_))
        ));
        // Failed placement takes no serial
        assert_eq!(db.last_serial(), 5);
    }

    #[test]
    fn test_move_between_ready_and_notready() {
        let tmp = TempDir::new().unwrap();
        let db = DocumentDb::open(config(&tmp), ConfigSnapshot::new(1, "music", schema())).unwrap();
        let id = DocumentId::new("id:1");
        db.put(song("id:1", "blue moon")).unwrap();

        db.move_document(&id, SubDbType::NotReady).unwrap();
        assert_eq!(db.num_active_docs(), 0);
        assert!(db.sub_db(NOTREADY_SUB_DB_ID).unwrap().has_document(&id));
        assert!(db.match_term("default", "title", "moon").unwrap().is_empty());
        assert!(db.get_document(&id).unwrap().is_some());

        assert!(matches!(
            db.move_document(&id, SubDbType::Removed),
            Err(DocDbError::InvalidOperation(_))
        ));
        db.move_document(&id, SubDbType::Ready).unwrap();
        assert_eq!(db.num_active_docs(), 1);
    }

    #[test]
    fn test_rejected_config_blocks_feed() {
        let tmp = TempDir::new().unwrap();
        let db = DocumentDb::open(config(&tmp), ConfigSnapshot::new(1, "music", schema())).unwrap();
        let renamed = ConfigSnapshot::new(2, "video", schema());
        assert!(matches!(
            db.apply_config(renamed).unwrap(),
            ReconfigOutcome::Rejected { .. }
        ));
        assert!(db.is_feed_blocked());
        assert!(matches!(
            db.put(song("id:1", "x")).unwrap(),
            FeedOutcome::Rejected { .. }
        ));

        assert_eq!(
            db.apply_config(ConfigSnapshot::new(3, "music", schema())).unwrap(),
            ReconfigOutcome::Unchanged
        );
        assert!(!db.is_feed_blocked());
        assert_eq!(db.put(song("id:1", "x")).unwrap(), FeedOutcome::Accepted(1));
    }

    #[test]
    fn test_wipe_is_all_or_nothing_while_prune_permission_flips() {
        let tmp = TempDir::new().unwrap();
        let db = DocumentDb::open(config(&tmp), ConfigSnapshot::new(1, "music", schema())).unwrap();
        for i in 1..=3 {
            db.put(song(&format!("id:{}", i), "blue moon")).unwrap();
        }
        let title_only = Schema::new().field("title", FieldSpec::text());
        db.apply_config(ConfigSnapshot::new(2, "music", title_only)).unwrap();
        assert_eq!(db.history_schema().field_names(), vec!["year"]);

        let ctx = db.owner_context().clone();
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flipper = {
            let stop = stop.clone();
            thread::spawn(move || {
                let mut allow = false;
                while !stop.load(Ordering::SeqCst) {
                    ctx.set_allow_prune(allow);
                    allow = !allow;
                }
                ctx.set_allow_prune(true);
            })
        };

        let has_year_attribute = || {
            db.sub_db(READY_SUB_DB_ID)
                .unwrap()
                .get_flush_targets()
                .iter()
                .any(|t| t.name().ends_with(".attribute.year"))
        };
        for _ in 0..200 {
            let outcome = db.wipe_history().unwrap();
            assert_eq!(db.history_schema().has_field("year"), has_year_attribute());
            if matches!(outcome, WipeOutcome::Applied { .. }) {
                break;
            }
        }
        stop.store(true, Ordering::SeqCst);
        flipper.join().unwrap();

        if !db.history_schema().is_empty() {
            assert!(matches!(db.wipe_history().unwrap(), WipeOutcome::Applied { .. }));
        }
        assert!(db.history_schema().is_empty());
        assert!(!has_year_attribute());
    }

    #[test]
    fn test_close_twice_and_feed_after_close() {
        let tmp = TempDir::new().unwrap();
        let db = DocumentDb::open(config(&tmp), ConfigSnapshot::new(1, "music", schema())).unwrap();
        db.close().unwrap();
        assert!(db.close().unwrap_err().is_fatal());
        assert!(db.put(song("id:1", "x")).unwrap_err().is_fatal());
    }
}

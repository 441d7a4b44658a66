use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{FeedOutcome, PruneOutcome, ReplayStats};
use crate::error::{DocDbError, Result};
use crate::models::{FeedOperation, FeedRecord};
use crate::owner::FeedHandlerOwner;
use crate::serial::{SerialClock, SerialNum};
use crate::tlog::{TlogStats, TransactionLog};

/// Serializes feed: allocates serials, logs operations before applying
/// them, drives replay and transaction log pruning.
pub struct FeedHandler {
    tlog: TransactionLog,
    clock: SerialClock,
    owner: Arc<dyn FeedHandlerOwner>,
    feed_mutex: Mutex<()>,
    prune_serial: AtomicU64,
    /// Set once a logged record could not be applied everywhere
    aborted: Mutex<Option<String>>,
}

impl FeedHandler {
    pub fn open(tlog_dir: PathBuf, owner: Arc<dyn FeedHandlerOwner>) -> Result<Self> {
        let tlog = TransactionLog::open(tlog_dir)?;
        Ok(Self {
            clock: SerialClock::new(tlog.last_serial()),
            prune_serial: AtomicU64::new(tlog.pruned_serial()),
            tlog,
            owner,
            feed_mutex: Mutex::new(()),
            aborted: Mutex::new(None),
        })
    }

    /// Serial of the last logged operation
    pub fn last_serial(&self) -> SerialNum {
        self.clock.last()
    }

    pub fn tlog_last_serial(&self) -> SerialNum {
        self.tlog.last_serial()
    }

    pub fn prune_serial(&self) -> SerialNum {
        self.prune_serial.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.lock().is_some()
    }

    fn check_not_aborted(&self) -> Result<()> {
        match &*self.aborted.lock() {
            Some(reason) => Err(DocDbError::protocol("feed", format!("aborted: {}", reason))),
            None => Ok(()),
        }
    }

    /// Stop accepting feed, flush-driven prunes and config commits
    fn abort(&self, serial: SerialNum, error: &DocDbError) {
        let mut aborted = self.aborted.lock();
        if aborted.is_none() {
            error!(serial, error = %error, "Feed aborted");
            *aborted = Some(format!("serial {}: {}", serial, error));
            drop(aborted);
            self.owner.on_feed_aborted(serial, error);
        }
    }

    /// Run `f` for the logged record at `serial`; any failure aborts feed
    fn after_logged<T>(&self, serial: SerialNum, f: impl FnOnce() -> Result<T>) -> Result<T> {
        f().inspect_err(|e| self.abort(serial, e))
    }

    pub fn tlog_stats(&self) -> Result<TlogStats> {
        self.tlog.stats()
    }

    /// Replay every logged operation after `from_serial`, then tell the
    /// owner replay is done.
    pub fn replay(&self, from_serial: SerialNum) -> Result<ReplayStats> {
        let _guard = self.feed_mutex.lock();
        self.check_not_aborted()?;
        let records = self.tlog.replay_from(from_serial)?;
        info!(
            from_serial,
            records = records.len(),
            last_serial = self.tlog.last_serial(),
            "Replaying transaction log"
        );

        let mut stats = ReplayStats {
            from_serial,
            ..ReplayStats::default()
        };
        for record in &records {
            self.clock.observe(record.serial);
            self.after_logged(record.serial, || self.owner.apply_operation(record, true))?;
            stats.records += 1;
            stats.last_serial = record.serial;
        }
        self.clock.observe(self.tlog.last_serial());

        self.owner.on_transaction_log_replay_done()?;
        if self.owner.has_pending_reprocessing() {
            self.owner.enter_redo_reprocess_state()?;
        }
        info!(records = stats.records, last_serial = stats.last_serial, "Replay done");
        Ok(stats)
    }

    /// Log and apply one operation
    pub fn perform_operation(&self, op: FeedOperation) -> Result<FeedOutcome> {
        let _guard = self.feed_mutex.lock();
        self.check_not_aborted()?;
        if self.owner.is_feed_blocked_by_rejected_config() {
            warn!(op = op.name(), "Feed blocked by rejected config");
            return Ok(FeedOutcome::Rejected {
                reason: "document database is running with a rejected config".to_string(),
            });
        }

        let wipe = matches!(op, FeedOperation::WipeHistory);
        let record = self.log_and_apply(op)?;
        if wipe {
            self.after_logged(record.serial, || self.owner.perform_wipe_history())?;
        }
        debug!(serial = record.serial, op = record.op.name(), "Performed operation");
        Ok(FeedOutcome::Accepted(record.serial))
    }

    /// Log a `NoOp` marking a config change and run `apply` with its serial
    /// while feed is held off. Not blocked by a rejected config: committing
    /// a good config is how feed gets unblocked.
    pub fn commit_config_change<T>(
        &self,
        apply: impl FnOnce(SerialNum) -> Result<T>,
    ) -> Result<(SerialNum, T)> {
        let _guard = self.feed_mutex.lock();
        self.check_not_aborted()?;
        let record = self.log_and_apply(FeedOperation::NoOp)?;
        let result = self.after_logged(record.serial, || apply(record.serial))?;
        info!(serial = record.serial, "Committed config change");
        Ok((record.serial, result))
    }

    /// Caller holds the feed mutex. The clock only moves once the record
    /// is logged, so a rejected operation leaves no serial gap. Once the
    /// append has been attempted, a failure leaves the sub-databases out of
    /// step with the log and aborts feed.
    fn log_and_apply(&self, op: FeedOperation) -> Result<FeedRecord> {
        let serial = self.clock.last() + 1;
        let record = self.owner.prepare_operation(serial, op).inspect_err(|e| {
            if e.is_fatal() {
                self.abort(serial, e);
            }
        })?;
        self.after_logged(serial, || self.tlog.append(&record))?;
        self.clock.observe(serial);
        self.after_logged(serial, || self.owner.apply_operation(&record, false))?;
        Ok(record)
    }

    pub fn sync(&self) -> Result<()> {
        self.tlog.sync()
    }

    /// Prune the transaction log up to `flushed_serial`. The prune serial
    /// reported to the owner never decreases.
    pub fn prune(&self, flushed_serial: SerialNum) -> Result<PruneOutcome> {
        if !self.owner.get_allow_prune() {
            debug!(flushed_serial, "Prune denied by owner");
            return Ok(PruneOutcome::Denied);
        }
        let _guard = self.feed_mutex.lock();
        self.check_not_aborted()?;
        let serial = flushed_serial.min(self.tlog.last_serial());
        let previous = self.prune_serial();
        if serial <= previous {
            return Ok(PruneOutcome::Unchanged(previous));
        }

        let records = self.tlog.prune(serial)?;
        self.prune_serial.store(serial, Ordering::SeqCst);
        self.owner.on_perform_prune(serial)?;
        info!(prune_serial = serial, records, "Pruned transaction log");
        Ok(PruneOutcome::Pruned { serial, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingOwner {
        applied: Mutex<Vec<(SerialNum, bool)>>,
        prunes: Mutex<Vec<SerialNum>>,
        wipes: AtomicU64,
        rejected: AtomicBool,
        deny_prune: AtomicBool,
        redo: AtomicBool,
        fail_prepare: AtomicBool,
        fail_apply: AtomicBool,
        aborts: Mutex<Vec<SerialNum>>,
    }

    impl FeedHandlerOwner for RecordingOwner {
        fn prepare_operation(&self, serial: SerialNum, op: FeedOperation) -> Result<FeedRecord> {
            if self.fail_prepare.load(Ordering::SeqCst) {
                return Err(DocDbError::DocumentNotFound("id:a".into()));
            }
            Ok(FeedRecord::new(serial, op))
        }
        fn apply_operation(&self, record: &FeedRecord, replaying: bool) -> Result<()> {
            if self.fail_apply.swap(false, Ordering::SeqCst) {
                return Err(DocDbError::Internal("store refused the write".into()));
            }
            self.applied.lock().push((record.serial, replaying));
            Ok(())
        }
        fn perform_wipe_history(&self) -> Result<()> {
            self.wipes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn on_transaction_log_replay_done(&self) -> Result<()> {
            Ok(())
        }
        fn has_pending_reprocessing(&self) -> bool {
            true
        }
        fn enter_redo_reprocess_state(&self) -> Result<()> {
            self.redo.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn on_perform_prune(&self, flushed_serial: SerialNum) -> Result<()> {
            let mut prunes = self.prunes.lock();
            if prunes.last().is_some_and(|last| *last > flushed_serial) {
                return Err(DocDbError::protocol("owner", "prune serial decreased"));
            }
            prunes.push(flushed_serial);
            Ok(())
        }
        fn is_feed_blocked_by_rejected_config(&self) -> bool {
            self.rejected.load(Ordering::SeqCst)
        }
        fn get_allow_prune(&self) -> bool {
            !self.deny_prune.load(Ordering::SeqCst)
        }
        fn on_feed_aborted(&self, serial: SerialNum, _error: &DocDbError) {
            self.aborts.lock().push(serial);
        }
    }

    fn put(id: &str) -> FeedOperation {
        FeedOperation::Put(Document::new(id))
    }

    #[test]
    fn test_feed_replay_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let owner = Arc::new(RecordingOwner::default());
        {
            let handler = FeedHandler::open(tmp.path().join("tlog"), owner.clone()).unwrap();
            for i in 1..=5 {
                assert_eq!(
                    handler.perform_operation(put(&format!("id:{}", i))).unwrap(),
                    FeedOutcome::Accepted(i)
                );
            }
            handler.perform_operation(FeedOperation::WipeHistory).unwrap();
            assert_eq!(owner.wipes.load(Ordering::SeqCst), 1);
        }

        let owner = Arc::new(RecordingOwner::default());
        let handler = FeedHandler::open(tmp.path().join("tlog"), owner.clone()).unwrap();
        let stats = handler.replay(3).unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(*owner.applied.lock(), vec![(4, true), (5, true), (6, true)]);
        // Wipes are not re-run on replay
        assert_eq!(owner.wipes.load(Ordering::SeqCst), 0);
        assert!(owner.redo.load(Ordering::SeqCst));
        assert_eq!(handler.perform_operation(FeedOperation::NoOp).unwrap(), FeedOutcome::Accepted(7));
    }

    #[test]
    fn test_rejected_config_blocks_feed() {
        let tmp = TempDir::new().unwrap();
        let owner = Arc::new(RecordingOwner::default());
        let handler = FeedHandler::open(tmp.path().join("tlog"), owner.clone()).unwrap();
        owner.rejected.store(true, Ordering::SeqCst);
        assert!(matches!(
            handler.perform_operation(put("id:a")).unwrap(),
            FeedOutcome::Rejected { .. }
        ));
        assert_eq!(handler.last_serial(), 0);
        assert!(owner.applied.lock().is_empty());
    }

    #[test]
    fn test_commit_config_change_logs_noop() {
        let tmp = TempDir::new().unwrap();
        let owner = Arc::new(RecordingOwner::default());
        let handler = FeedHandler::open(tmp.path().join("tlog"), owner.clone()).unwrap();
        handler.perform_operation(put("id:a")).unwrap();

        // Config commits go through even while feed is blocked
        owner.rejected.store(true, Ordering::SeqCst);
        let (serial, seen) = handler.commit_config_change(|serial| Ok(serial * 10)).unwrap();
        assert_eq!((serial, seen), (2, 20));
        assert_eq!(handler.tlog_last_serial(), 2);
        assert_eq!(*owner.applied.lock(), vec![(1, false), (2, false)]);

        let err = handler
            .commit_config_change(|_| -> Result<()> { Err(DocDbError::InvalidConfig("bad".into())) })
            .unwrap_err();
        assert!(matches!(err, DocDbError::InvalidConfig(_)));
        // The marker stays logged, and nothing may follow it
        assert_eq!(handler.last_serial(), 3);
        assert!(handler.is_aborted());
        assert_eq!(*owner.aborts.lock(), vec![3]);
        owner.rejected.store(false, Ordering::SeqCst);
        assert!(handler.perform_operation(put("id:b")).unwrap_err().is_fatal());
    }

    #[test]
    fn test_failed_apply_aborts_feed() {
        let tmp = TempDir::new().unwrap();
        let owner = Arc::new(RecordingOwner::default());
        let handler = FeedHandler::open(tmp.path().join("tlog"), owner.clone()).unwrap();
        handler.perform_operation(put("id:a")).unwrap();

        owner.fail_apply.store(true, Ordering::SeqCst);
        assert!(handler.perform_operation(put("id:b")).is_err());
        assert_eq!(handler.tlog_last_serial(), 2);
        assert!(handler.is_aborted());
        assert_eq!(*owner.aborts.lock(), vec![2]);

        assert!(handler.perform_operation(put("id:c")).unwrap_err().is_fatal());
        assert!(handler.commit_config_change(|_| Ok(())).is_err());
        assert!(handler.prune(2).unwrap_err().is_fatal());
        assert_eq!(handler.prune_serial(), 0);
        assert_eq!(handler.last_serial(), 2);
        assert!(owner.prunes.lock().is_empty());
    }

    #[test]
    fn test_failed_prepare_leaves_no_gap() {
        let tmp = TempDir::new().unwrap();
        let owner = Arc::new(RecordingOwner::default());
        let handler = FeedHandler::open(tmp.path().join("tlog"), owner.clone()).unwrap();
        owner.fail_prepare.store(true, Ordering::SeqCst);
        assert!(handler.perform_operation(put("id:a")).is_err());
        assert!(!handler.is_aborted());
        owner.fail_prepare.store(false, Ordering::SeqCst);
        assert_eq!(handler.perform_operation(put("id:a")).unwrap(), FeedOutcome::Accepted(1));
    }

    #[test]
    fn test_prune_serials_never_decrease() {
        let tmp = TempDir::new().unwrap();
        let owner = Arc::new(RecordingOwner::default());
        let handler = FeedHandler::open(tmp.path().join("tlog"), owner.clone()).unwrap();
        for i in 1..=10 {
            handler.perform_operation(put(&format!("id:{}", i))).unwrap();
        }

        assert_eq!(
            handler.prune(4).unwrap(),
            PruneOutcome::Pruned { serial: 4, records: 4 }
        );
        assert_eq!(handler.prune(2).unwrap(), PruneOutcome::Unchanged(4));
        assert_eq!(
            handler.prune(50).unwrap(),
            PruneOutcome::Pruned { serial: 10, records: 6 }
        );

        owner.deny_prune.store(true, Ordering::SeqCst);
        assert_eq!(handler.prune(60).unwrap(), PruneOutcome::Denied);
        assert_eq!(*owner.prunes.lock(), vec![4, 10]);
    }
}

//! Callback interfaces from the feed handler and the sub-databases back to
//! the document database that owns them.
//!
//! Owners are handed out as `Arc<dyn ...>` objects that do not own the
//! sub-databases, so no reference cycle exists between a sub-database and
//! its owner.

use std::sync::Arc;

use crate::error::{DocDbError, Result};
use crate::index::IndexManagerFactory;
use crate::models::{FeedOperation, FeedRecord};
use crate::serial::SerialNum;

/// Owner of a feed handler
pub trait FeedHandlerOwner: Send + Sync {
    /// Decide where `op` goes and build the record that will be logged
    fn prepare_operation(&self, serial: SerialNum, op: FeedOperation) -> Result<FeedRecord>;

    /// Apply a logged record to the sub-databases
    fn apply_operation(&self, record: &FeedRecord, replaying: bool) -> Result<()>;

    /// A `WipeHistory` operation has been logged and applied
    fn perform_wipe_history(&self) -> Result<()>;

    fn on_transaction_log_replay_done(&self) -> Result<()>;

    /// Reprocessing queued before or during replay must finish before the
    /// database is consistent with its config
    fn has_pending_reprocessing(&self) -> bool;

    fn enter_redo_reprocess_state(&self) -> Result<()>;

    /// The transaction log was pruned up to `flushed_serial`
    fn on_perform_prune(&self, flushed_serial: SerialNum) -> Result<()>;

    fn is_feed_blocked_by_rejected_config(&self) -> bool;

    fn get_allow_prune(&self) -> bool;

    /// The record at `serial` may be applied to some sub-databases and not
    /// others. Nothing may be fed, flushed or pruned after this.
    fn on_feed_aborted(&self, serial: SerialNum, error: &DocDbError);
}

/// Owner of a document sub-database
pub trait SubDbOwner: Send + Sync {
    /// A sub-database replaced its feed view
    fn sync_feed_view(&self);

    fn get_index_manager_factory(&self, name: &str) -> Option<Arc<dyn IndexManagerFactory>>;

    fn get_name(&self) -> &str;

    fn get_distribution_key(&self) -> u32;

    fn get_allow_prune(&self) -> bool;
}

//! Document sub-databases: the partitions a document database is split
//! into, their two-phase initialization and lifecycle.
//!
//! A sub-database owns a document meta store plus, depending on its type,
//! a summary store, attributes and a text index. It exposes them through a
//! feed view (write path) and a search view (read path), and reports the
//! flushed-serial bounds that decide how much transaction log must be kept.

#[cfg(any(test, feature = "testing"))]
mod dummy;
mod initializer;
mod store;
mod types;

#[cfg(any(test, feature = "testing"))]
pub use dummy::DummyDocumentSubDb;
pub use initializer::{SubDbInitializer, SubDbInitializerResult};
pub use store::StoreSubDb;
pub use types::{
    SubDbState, SubDbType, WipeOutcome, NOTREADY_SUB_DB_ID, READY_SUB_DB_ID, REMOVED_SUB_DB_ID,
};

use std::sync::Arc;

use crate::attribute::AttributeManager;
use crate::config::{IndexConfig, SummaryConfig};
use crate::error::Result;
use crate::feed::FeedView;
use crate::flush::FlushTargetList;
use crate::index::{IndexManager, IndexWriter};
use crate::metastore::DocumentMetaStoreContext;
use crate::models::DocumentId;
use crate::reconfig::{ConfigSnapshot, ReconfigParams};
use crate::reprocessing::{ReprocessingTask, ReprocessingTracker};
use crate::retriever::DocumentRetriever;
use crate::schema::Schema;
use crate::search::{MatchingStats, SearchView, SearchableStats, SessionManager};
use crate::serial::SerialNum;
use crate::summary::{SummaryAdapter, SummaryManager};

/// One partition of a document database.
///
/// Lifecycle: `create_initializer` -> `run` (any thread) -> `setup` ->
/// `init_views` -> `on_replay_done` -> serving -> `close`. Calls out of
/// order fail with a protocol violation.
pub trait DocumentSubDb: Send + Sync {
    fn sub_db_id(&self) -> u32;

    fn name(&self) -> &str;

    fn sub_db_type(&self) -> SubDbType;

    fn state(&self) -> SubDbState;

    /// Plan initialization. Does no I/O.
    fn create_initializer(
        &self,
        snapshot: &ConfigSnapshot,
        config_serial: SerialNum,
        union_schema: &Schema,
        summary_config: &SummaryConfig,
        index_config: &IndexConfig,
    ) -> Result<SubDbInitializer>;

    /// Install loaded subsystems. Only valid once.
    fn setup(&self, result: SubDbInitializerResult) -> Result<()>;

    fn init_views(&self, snapshot: Arc<ConfigSnapshot>, sessions: Arc<SessionManager>) -> Result<()>;

    /// Move to `new` with as little work as possible. Returns the
    /// reprocessing needed to make existing documents match it, tagged
    /// with `serial`.
    fn apply_config(
        &self,
        new: &Arc<ConfigSnapshot>,
        old: &Arc<ConfigSnapshot>,
        serial: SerialNum,
        params: &ReconfigParams,
    ) -> Result<Vec<Box<dyn ReprocessingTask>>>;

    fn get_search_view(&self) -> Option<Arc<SearchView>>;

    fn get_feed_view(&self) -> Option<Arc<dyn FeedView>>;

    fn clear_views(&self);

    fn get_summary_manager(&self) -> Option<Arc<dyn SummaryManager>>;

    fn get_attribute_manager(&self) -> Option<Arc<dyn AttributeManager>>;

    fn get_index_manager(&self) -> Option<Arc<dyn IndexManager>>;

    fn get_summary_adapter(&self) -> Option<SummaryAdapter>;

    fn get_index_writer(&self) -> Option<IndexWriter>;

    fn get_document_meta_store_context(&self) -> Option<DocumentMetaStoreContext>;

    fn get_flush_targets(&self) -> FlushTargetList;

    fn get_num_docs(&self) -> usize;

    fn get_num_active_docs(&self) -> usize;

    fn has_document(&self, id: &DocumentId) -> bool;

    fn on_replay_done(&self) -> Result<()>;

    /// Returns whether the signal was accepted. A signal arriving while
    /// tasks registered at or before `serial` are outstanding is deferred
    /// and accepted once they finish.
    fn on_reprocess_done(&self, serial: SerialNum) -> Result<bool>;

    /// Earliest transaction log serial this sub-database still needs
    fn get_oldest_flushed_serial(&self) -> SerialNum;

    fn get_newest_flushed_serial(&self) -> SerialNum;

    fn wipe_history(
        &self,
        wipe_serial: SerialNum,
        new_history_schema: &Schema,
        wipe_schema: &Schema,
    ) -> Result<WipeOutcome>;

    fn set_index_schema(&self, schema: &Schema, fusion_schema: &Schema) -> Result<()>;

    fn get_searchable_stats(&self) -> SearchableStats;

    fn get_document_retriever(&self) -> Result<Box<dyn DocumentRetriever>>;

    fn get_matcher_stats(&self, rank_profile: &str) -> MatchingStats;

    /// Reprocessing found necessary while loading (e.g. attributes whose
    /// population was interrupted). Drains the list.
    fn take_reprocessing_tasks(&self) -> Vec<Box<dyn ReprocessingTask>>;

    fn has_pending_reprocessing(&self) -> bool;

    fn reprocessing_tracker(&self) -> Arc<ReprocessingTracker>;

    /// Serial of the last operation applied through the feed view
    fn last_serial(&self) -> SerialNum;

    fn close(&self) -> Result<()>;
}

/// Minimum oldest-flushed serial over `sub_dbs`: where replay must start
pub fn oldest_flushed_serial_of(sub_dbs: &[Box<dyn DocumentSubDb>]) -> SerialNum {
    sub_dbs
        .iter()
        .map(|s| s.get_oldest_flushed_serial())
        .min()
        .unwrap_or(0)
}

/// Maximum newest-flushed serial over `sub_dbs`
pub fn newest_flushed_serial_of(sub_dbs: &[Box<dyn DocumentSubDb>]) -> SerialNum {
    sub_dbs
        .iter()
        .map(|s| s.get_newest_flushed_serial())
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_flushed_serials() {
        let sub_dbs: Vec<Box<dyn DocumentSubDb>> = vec![
            Box::new(DummyDocumentSubDb::new(0, "ready").with_flushed_serials(10, 10)),
            Box::new(DummyDocumentSubDb::new(1, "removed").with_flushed_serials(7, 9)),
            Box::new(DummyDocumentSubDb::new(2, "notready").with_flushed_serials(12, 12)),
        ];
        assert_eq!(oldest_flushed_serial_of(&sub_dbs), 7);
        assert_eq!(newest_flushed_serial_of(&sub_dbs), 12);
        assert_eq!(oldest_flushed_serial_of(&[]), 0);
    }

    #[test]
    fn test_dummy_lifecycle_and_deferred_done() {
        let dummy = DummyDocumentSubDb::new(0, "ready");
        assert!(dummy.get_feed_view().is_none());
        assert!(dummy.on_replay_done().unwrap_err().is_fatal());

        let ticket = dummy.reprocessing_tracker().register(5, "task".into());
        assert!(!dummy.on_reprocess_done(5).unwrap());
        dummy
            .reprocessing_tracker()
            .finish(ticket, crate::reprocessing::TaskOutcome::Completed);
        assert!(dummy.on_reprocess_done(5).unwrap());
        assert_eq!(dummy.reprocess_done_calls(), vec![5, 5]);

        dummy.close().unwrap();
        assert!(dummy.close().is_err());
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::initializer::{SubDbInitializer, SubDbInitializerResult};
use super::types::{SubDbState, SubDbType, WipeOutcome};
use super::DocumentSubDb;
use crate::attribute::AttributeManager;
use crate::config::{IndexConfig, SummaryConfig};
use crate::error::{DocDbError, Result};
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

/// Sub-database without storage. Flushed serials are set by the test and
/// every lifecycle call only moves the state machine.
pub struct DummyDocumentSubDb {
    id: u32,
    name: String,
    state: Mutex<SubDbState>,
    oldest_flushed: AtomicU64,
    newest_flushed: AtomicU64,
    last_serial: AtomicU64,
    reprocessing: Arc<ReprocessingTracker>,
    reprocess_done: Mutex<Vec<SerialNum>>,
}

impl DummyDocumentSubDb {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            reprocessing: Arc::new(ReprocessingTracker::new(name.clone())),
            name,
            state: Mutex::new(SubDbState::Created),
            oldest_flushed: AtomicU64::new(0),
            newest_flushed: AtomicU64::new(0),
            last_serial: AtomicU64::new(0),
            reprocess_done: Mutex::new(Vec::new()),
        }
    }

    pub fn with_flushed_serials(self, oldest: SerialNum, newest: SerialNum) -> Self {
        self.set_flushed_serials(oldest, newest);
        self
    }

    pub fn set_flushed_serials(&self, oldest: SerialNum, newest: SerialNum) {
        self.oldest_flushed.store(oldest, Ordering::SeqCst);
        self.newest_flushed.store(newest, Ordering::SeqCst);
        self.last_serial.fetch_max(newest, Ordering::SeqCst);
    }

    /// Serials passed to `on_reprocess_done`, in call order
    pub fn reprocess_done_calls(&self) -> Vec<SerialNum> {
        self.reprocess_done.lock().clone()
    }

    fn transition(&self, allowed: &[SubDbState], to: SubDbState, op: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !allowed.contains(&*state) {
            return Err(DocDbError::protocol(
                &self.name,
                format!("{} not allowed in state {}", op, *state),
            ));
        }
        *state = to;
        Ok(())
    }
}

impl DocumentSubDb for DummyDocumentSubDb {
    fn sub_db_id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sub_db_type(&self) -> SubDbType {
        SubDbType::from_id(self.id).unwrap_or(SubDbType::NotReady)
    }

    fn state(&self) -> SubDbState {
        *self.state.lock()
    }

    fn create_initializer(
        &self,
        _snapshot: &ConfigSnapshot,
        _config_serial: SerialNum,
        _union_schema: &Schema,
        _summary_config: &SummaryConfig,
        _index_config: &IndexConfig,
    ) -> Result<SubDbInitializer> {
        Err(DocDbError::Internal(format!("{} has no storage to initialize", self.name)))
    }

    fn setup(&self, _result: SubDbInitializerResult) -> Result<()> {
        self.transition(
            &[SubDbState::Created, SubDbState::Planned],
            SubDbState::Initialized,
            "setup",
        )
    }

    fn init_views(&self, _snapshot: Arc<ConfigSnapshot>, _sessions: Arc<SessionManager>) -> Result<()> {
        self.transition(&[SubDbState::Initialized], SubDbState::ViewsActive, "init_views")
    }

    fn apply_config(
        &self,
        _new: &Arc<ConfigSnapshot>,
        _old: &Arc<ConfigSnapshot>,
        _serial: SerialNum,
        _params: &ReconfigParams,
    ) -> Result<Vec<Box<dyn ReprocessingTask>>> {
        Ok(Vec::new())
    }

    fn get_search_view(&self) -> Option<Arc<SearchView>> {
        None
    }

    fn get_feed_view(&self) -> Option<Arc<dyn FeedView>> {
        None
    }

    fn clear_views(&self) {}

    fn get_summary_manager(&self) -> Option<Arc<dyn SummaryManager>> {
        None
    }

    fn get_attribute_manager(&self) -> Option<Arc<dyn AttributeManager>> {
        None
    }

    fn get_index_manager(&self) -> Option<Arc<dyn IndexManager>> {
        None
    }

    fn get_summary_adapter(&self) -> Option<SummaryAdapter> {
        None
    }

    fn get_index_writer(&self) -> Option<IndexWriter> {
        None
    }

    fn get_document_meta_store_context(&self) -> Option<DocumentMetaStoreContext> {
        None
    }

    fn get_flush_targets(&self) -> FlushTargetList {
        Vec::new()
    }

    fn get_num_docs(&self) -> usize {
        0
    }

    fn get_num_active_docs(&self) -> usize {
        0
    }

    fn has_document(&self, _id: &DocumentId) -> bool {
        false
    }

    fn on_replay_done(&self) -> Result<()> {
        self.transition(&[SubDbState::ViewsActive], SubDbState::Serving, "on_replay_done")
    }

    fn on_reprocess_done(&self, serial: SerialNum) -> Result<bool> {
        self.reprocess_done.lock().push(serial);
        Ok(self.reprocessing.on_reprocess_done(serial))
    }

    fn get_oldest_flushed_serial(&self) -> SerialNum {
        self.oldest_flushed.load(Ordering::SeqCst)
    }

    fn get_newest_flushed_serial(&self) -> SerialNum {
        self.newest_flushed.load(Ordering::SeqCst)
    }

    fn wipe_history(
        &self,
        _wipe_serial: SerialNum,
        _new_history_schema: &Schema,
        _wipe_schema: &Schema,
    ) -> Result<WipeOutcome> {
        Ok(WipeOutcome::Applied { wiped: Vec::new() })
    }

    fn set_index_schema(&self, _schema: &Schema, _fusion_schema: &Schema) -> Result<()> {
        Ok(())
    }

    fn get_searchable_stats(&self) -> SearchableStats {
        SearchableStats::default()
    }

    fn get_document_retriever(&self) -> Result<Box<dyn DocumentRetriever>> {
        Err(DocDbError::Internal(format!("{} has no documents", self.name)))
    }

    fn get_matcher_stats(&self, _rank_profile: &str) -> MatchingStats {
        MatchingStats::default()
    }

    fn take_reprocessing_tasks(&self) -> Vec<Box<dyn ReprocessingTask>> {
        Vec::new()
    }

    fn has_pending_reprocessing(&self) -> bool {
        self.reprocessing.outstanding() > 0
    }

    fn reprocessing_tracker(&self) -> Arc<ReprocessingTracker> {
        self.reprocessing.clone()
    }

    fn last_serial(&self) -> SerialNum {
        self.last_serial.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_closed() {
            return Err(DocDbError::protocol(&self.name, "closed twice"));
        }
        *state = SubDbState::Closed;
        Ok(())
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::initializer::{SubDbInitializer, SubDbInitializerResult};
use super::types::{SubDbState, SubDbType, WipeOutcome};
use super::DocumentSubDb;
use crate::attribute::{AttributeManager, AttributeVector};
use crate::config::{IndexConfig, SummaryConfig};
use crate::error::{DocDbError, Result};
use crate::feed::{FeedView, FeedViewContext, StoreFeedView};
use crate::flush::{newest_flushed_serial, oldest_flushed_serial, FlushTargetList};
use crate::index::{IndexManager, IndexWriter};
use crate::metastore::DocumentMetaStoreContext;
use crate::models::DocumentId;
use crate::owner::SubDbOwner;
use crate::reconfig::{AttributeReconfig, ConfigSnapshot, ReconfigParams};
use crate::reprocessing::{AttributePopulateTask, ReprocessingTask, ReprocessingTracker, TrackedTask};
use crate::retriever::{DocumentRetriever, StoreDocumentRetriever};
use crate::schema::Schema;
use crate::search::{
    MatchingStats, MatchingStatsRegistry, SearchView, SearchViewParts, SearchableStats,
    SessionManager,
};
use crate::serial::{SerialNum, SerialTracker};
use crate::summary::{SummaryAdapter, SummaryManager};
use crate::util::disk_usage;

/// Subsystems installed by `setup`
struct Components {
    meta: DocumentMetaStoreContext,
    summary: Option<Arc<dyn SummaryManager>>,
    attributes: Option<Arc<dyn AttributeManager>>,
    index: Option<Arc<dyn IndexManager>>,
    tracker: Arc<SerialTracker>,
    replay_floor: SerialNum,
}

impl Components {
    fn flush_targets(&self) -> FlushTargetList {
        let mut targets = vec![self.meta.flush_target()];
        if let Some(summary) = &self.summary {
            targets.extend(summary.flush_targets());
        }
        if let Some(attributes) = &self.attributes {
            targets.extend(attributes.flush_targets());
        }
        if let Some(index) = &self.index {
            targets.extend(index.flush_targets());
        }
        targets
    }

    fn memory_usage(&self) -> usize {
        self.meta.memory_usage()
            + self.summary.as_ref().map_or(0, |s| s.memory_usage())
            + self.attributes.as_ref().map_or(0, |a| a.memory_usage())
            + self.index.as_ref().map_or(0, |i| i.memory_usage())
    }
}

/// Sub-database over logged stores. The subsystem set is chosen by its
/// `SubDbType`.
pub struct StoreSubDb {
    sub_db_type: SubDbType,
    name: String,
    dir: PathBuf,
    owner: Arc<dyn SubDbOwner>,
    index_factory: String,
    state: Mutex<SubDbState>,
    components: ArcSwapOption<Components>,
    feed_view: ArcSwapOption<StoreFeedView>,
    search_view: ArcSwapOption<SearchView>,
    snapshot: ArcSwapOption<ConfigSnapshot>,
    sessions: ArcSwapOption<SessionManager>,
    fusion_schema: Mutex<Schema>,
    history_schema: Mutex<Schema>,
    reprocessing: Arc<ReprocessingTracker>,
    feed_lock: Arc<Mutex<()>>,
    matching: Arc<MatchingStatsRegistry>,
    startup_tasks: Mutex<Vec<Box<dyn ReprocessingTask>>>,
}

impl StoreSubDb {
    /// `db_dir` is the document database directory; the sub-database lives
    /// in its own directory below it.
    pub fn new(
        sub_db_type: SubDbType,
        db_dir: &Path,
        owner: Arc<dyn SubDbOwner>,
        index_factory: impl Into<String>,
    ) -> Self {
        let name = format!("{}.{}", owner.get_name(), sub_db_type.name());
        Self {
            dir: db_dir.join(sub_db_type.dir_name()),
            reprocessing: Arc::new(ReprocessingTracker::new(name.clone())),
            name,
            sub_db_type,
            owner,
            index_factory: index_factory.into(),
            state: Mutex::new(SubDbState::Created),
            components: ArcSwapOption::empty(),
            feed_view: ArcSwapOption::empty(),
            search_view: ArcSwapOption::empty(),
            snapshot: ArcSwapOption::empty(),
            sessions: ArcSwapOption::empty(),
            fusion_schema: Mutex::new(Schema::new()),
            history_schema: Mutex::new(Schema::new()),
            feed_lock: Arc::new(Mutex::new(())),
            matching: Arc::new(MatchingStatsRegistry::new()),
            startup_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current config snapshot, once views are active
    pub fn snapshot(&self) -> Option<Arc<ConfigSnapshot>> {
        self.snapshot.load_full()
    }

    pub fn history_schema(&self) -> Schema {
        self.history_schema.lock().clone()
    }

    fn components(&self) -> Result<Arc<Components>> {
        self.components.load_full().ok_or_else(|| {
            DocDbError::protocol(&self.name, format!("no subsystems in state {}", self.state()))
        })
    }

    fn transition(&self, allowed: &[SubDbState], to: SubDbState, op: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !allowed.contains(&*state) {
            return Err(DocDbError::protocol(
                &self.name,
                format!("{} not allowed in state {}", op, *state),
            ));
        }
        debug!(sub_db = %self.name, from = %*state, to = %to, "{}", op);
        *state = to;
        Ok(())
    }

    fn require_state(&self, allowed: &[SubDbState], op: &str) -> Result<()> {
        let state = *self.state.lock();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(DocDbError::protocol(
                &self.name,
                format!("{} not allowed in state {}", op, state),
            ))
        }
    }

    fn build_feed_view(&self, c: &Components, snapshot: Arc<ConfigSnapshot>) -> StoreFeedView {
        let ctx = FeedViewContext {
            sub_db_id: self.sub_db_type.id(),
            sub_db_name: self.name.clone(),
            active_docs: self.sub_db_type.active_docs(),
            meta: c.meta.clone(),
            summary: c.summary.clone().map(SummaryAdapter::new),
            attributes: c.attributes.clone(),
            index: c.index.clone().map(IndexWriter::new),
            tracker: c.tracker.clone(),
            replay_floor: c.replay_floor,
            feed_lock: self.feed_lock.clone(),
        };
        StoreFeedView::new(ctx, snapshot)
    }

    fn build_search_view(
        &self,
        c: &Components,
        snapshot: Arc<ConfigSnapshot>,
        sessions: Arc<SessionManager>,
    ) -> SearchView {
        SearchView::new(
            self.sub_db_type.id(),
            snapshot,
            SearchViewParts {
                meta: c.meta.clone(),
                attributes: c.attributes.clone(),
                index: c.index.clone(),
                summary: c.summary.clone(),
            },
            sessions,
            self.matching.clone(),
        )
    }

    fn populate_task(
        &self,
        c: &Components,
        vector: Arc<AttributeVector>,
        serial: SerialNum,
    ) -> Option<Box<dyn ReprocessingTask>> {
        let summary = c.summary.clone()?;
        let task = AttributePopulateTask::new(
            self.sub_db_type.id(),
            serial,
            vector,
            c.meta.clone(),
            summary,
            self.feed_lock.clone(),
        );
        Some(TrackedTask::new(Box::new(task), self.reprocessing.clone()).boxed())
    }
}

impl DocumentSubDb for StoreSubDb {
    fn sub_db_id(&self) -> u32 {
        self.sub_db_type.id()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sub_db_type(&self) -> SubDbType {
        self.sub_db_type
    }

    fn state(&self) -> SubDbState {
        *self.state.lock()
    }

    fn create_initializer(
        &self,
        snapshot: &ConfigSnapshot,
        config_serial: SerialNum,
        union_schema: &Schema,
        summary_config: &SummaryConfig,
        index_config: &IndexConfig,
    ) -> Result<SubDbInitializer> {
        let index_factory = if self.sub_db_type.has_index() {
            let factory = self
                .owner
                .get_index_manager_factory(&self.index_factory)
                .ok_or_else(|| {
                    DocDbError::InvalidConfig(format!(
                        "unknown index manager factory '{}'",
                        self.index_factory
                    ))
                })?;
            Some(factory)
        } else {
            None
        };
        self.transition(
            &[SubDbState::Created, SubDbState::Planned],
            SubDbState::Planned,
            "create_initializer",
        )?;
        Ok(SubDbInitializer::new(
            self.sub_db_type,
            self.name.clone(),
            self.dir.clone(),
            config_serial,
            &snapshot.schema,
            union_schema,
            snapshot.summary_fields(),
            summary_config.clone(),
            index_config.clone(),
            index_factory,
        ))
    }

    fn setup(&self, result: SubDbInitializerResult) -> Result<()> {
        if result.sub_db_type != self.sub_db_type {
            return Err(DocDbError::protocol(
                &self.name,
                format!("initializer result for {} sub-database", result.sub_db_type),
            ));
        }
        self.transition(&[SubDbState::Planned], SubDbState::Initialized, "setup")?;

        let mut components = Components {
            meta: result.meta,
            summary: result.summary,
            attributes: result.attributes,
            index: result.index,
            tracker: Arc::new(SerialTracker::new(self.name.clone(), 0)),
            replay_floor: 0,
        };
        let targets = components.flush_targets();
        let floor = oldest_flushed_serial(&targets, components.meta.last_applied());
        components.tracker = Arc::new(SerialTracker::new(self.name.clone(), floor));
        components.replay_floor = floor;

        let mut tasks = Vec::new();
        if let Some(attributes) = &components.attributes {
            for vector in attributes.unpopulated() {
                let serial = vector.created_serial();
                if let Some(task) = self.populate_task(&components, vector, serial) {
                    tasks.push(task);
                }
            }
        }
        info!(
            sub_db = %self.name,
            replay_floor = floor,
            newest_flushed = newest_flushed_serial(&targets),
            docs = components.meta.num_docs(),
            pending_tasks = tasks.len(),
            "Sub-database set up"
        );
        *self.startup_tasks.lock() = tasks;
        self.components.store(Some(Arc::new(components)));
        Ok(())
    }

    fn init_views(&self, snapshot: Arc<ConfigSnapshot>, sessions: Arc<SessionManager>) -> Result<()> {
        self.require_state(&[SubDbState::Initialized], "init_views")?;
        let c = self.components()?;
        self.feed_view
            .store(Some(Arc::new(self.build_feed_view(&c, snapshot.clone()))));
        self.search_view.store(Some(Arc::new(self.build_search_view(
            &c,
            snapshot.clone(),
            sessions.clone(),
        ))));
        self.snapshot.store(Some(snapshot));
        self.sessions.store(Some(sessions));
        self.transition(&[SubDbState::Initialized], SubDbState::ViewsActive, "init_views")
    }

    fn apply_config(
        &self,
        new: &Arc<ConfigSnapshot>,
        old: &Arc<ConfigSnapshot>,
        serial: SerialNum,
        params: &ReconfigParams,
    ) -> Result<Vec<Box<dyn ReprocessingTask>>> {
        self.require_state(&[SubDbState::ViewsActive, SubDbState::Serving], "apply_config")?;
        if params.requires_restart() {
            return Err(DocDbError::InvalidConfig(format!(
                "document type change {} -> {} requires restart",
                old.doc_type, new.doc_type
            )));
        }
        let c = self.components()?;
        let _guard = self.feed_lock.lock();

        let mut tasks = Vec::new();
        if !params.config_has_changed() {
            self.snapshot.store(Some(new.clone()));
            return Ok(tasks);
        }

        if let Some(attributes) = &c.attributes {
            if params.should_attribute_manager_change() {
                let plan = AttributeReconfig::plan(
                    &attributes.attribute_specs(),
                    &new.schema.attribute_specs(),
                    &attributes.history_specs(),
                );
                let has_documents = c.meta.num_docs() > 0;
                for vector in attributes.reconfigure(&plan, serial, has_documents)? {
                    if let Some(task) = self.populate_task(&c, vector, serial) {
                        tasks.push(task);
                    }
                }
            }
        }
        if let Some(summary) = &c.summary {
            if params.should_summary_manager_change() {
                summary.set_summary_fields(new.summary_fields());
            }
        }
        if let Some(index) = &c.index {
            if params.should_index_manager_change() {
                let fusion = self.fusion_schema.lock().clone();
                index.set_schema(new.schema.union(&fusion).index_schema());
            }
        }

        if params.should_feed_view_change() {
            self.feed_view
                .store(Some(Arc::new(self.build_feed_view(&c, new.clone()))));
            self.owner.sync_feed_view();
        }
        if params.should_search_view_change() {
            if let Some(sessions) = self.sessions.load_full() {
                self.search_view
                    .store(Some(Arc::new(self.build_search_view(&c, new.clone(), sessions))));
            }
        }
        self.snapshot.store(Some(new.clone()));

        info!(
            sub_db = %self.name,
            serial,
            old_generation = old.generation,
            new_generation = new.generation,
            tasks = tasks.len(),
            "Applied config"
        );
        Ok(tasks)
    }

    fn get_search_view(&self) -> Option<Arc<SearchView>> {
        self.search_view.load_full()
    }

    fn get_feed_view(&self) -> Option<Arc<dyn FeedView>> {
        self.feed_view
            .load_full()
            .map(|view| view as Arc<dyn FeedView>)
    }

    fn clear_views(&self) {
        self.feed_view.store(None);
        self.search_view.store(None);
        debug!(sub_db = %self.name, "Cleared views");
    }

    fn get_summary_manager(&self) -> Option<Arc<dyn SummaryManager>> {
        self.components.load_full().and_then(|c| c.summary.clone())
    }

    fn get_attribute_manager(&self) -> Option<Arc<dyn AttributeManager>> {
        self.components.load_full().and_then(|c| c.attributes.clone())
    }

    fn get_index_manager(&self) -> Option<Arc<dyn IndexManager>> {
        self.components.load_full().and_then(|c| c.index.clone())
    }

    fn get_summary_adapter(&self) -> Option<SummaryAdapter> {
        self.get_summary_manager().map(SummaryAdapter::new)
    }

    fn get_index_writer(&self) -> Option<IndexWriter> {
        self.get_index_manager().map(IndexWriter::new)
    }

    fn get_document_meta_store_context(&self) -> Option<DocumentMetaStoreContext> {
        self.components.load_full().map(|c| c.meta.clone())
    }

    fn get_flush_targets(&self) -> FlushTargetList {
        self.components
            .load_full()
            .map(|c| c.flush_targets())
            .unwrap_or_default()
    }

    fn get_num_docs(&self) -> usize {
        self.components.load_full().map_or(0, |c| c.meta.num_docs())
    }

    fn get_num_active_docs(&self) -> usize {
        self.components
            .load_full()
            .map_or(0, |c| c.meta.num_active_docs())
    }

    fn has_document(&self, id: &DocumentId) -> bool {
        self.components
            .load_full()
            .is_some_and(|c| c.meta.has_document(id))
    }

    fn on_replay_done(&self) -> Result<()> {
        self.transition(&[SubDbState::ViewsActive], SubDbState::Serving, "on_replay_done")?;
        info!(
            sub_db = %self.name,
            docs = self.get_num_docs(),
            active_docs = self.get_num_active_docs(),
            last_serial = self.last_serial(),
            "Replay done, serving"
        );
        Ok(())
    }

    fn on_reprocess_done(&self, serial: SerialNum) -> Result<bool> {
        self.require_state(
            &[SubDbState::ViewsActive, SubDbState::Serving],
            "on_reprocess_done",
        )?;
        let accepted = self.reprocessing.on_reprocess_done(serial);
        if !accepted {
            debug!(
                sub_db = %self.name,
                serial,
                outstanding = self.reprocessing.outstanding_at_or_before(serial),
                "Reprocess done deferred"
            );
        }
        Ok(accepted)
    }

    fn get_oldest_flushed_serial(&self) -> SerialNum {
        oldest_flushed_serial(&self.get_flush_targets(), self.last_serial())
    }

    fn get_newest_flushed_serial(&self) -> SerialNum {
        newest_flushed_serial(&self.get_flush_targets())
    }

    fn wipe_history(
        &self,
        wipe_serial: SerialNum,
        new_history_schema: &Schema,
        wipe_schema: &Schema,
    ) -> Result<WipeOutcome> {
        self.require_state(&[SubDbState::Serving], "wipe_history")?;
        if !self.owner.get_allow_prune() {
            debug!(sub_db = %self.name, wipe_serial, "History wipe denied by owner");
            return Ok(WipeOutcome::Denied);
        }
        let outstanding = self.reprocessing.outstanding_at_or_before(wipe_serial);
        if outstanding > 0 {
            warn!(
                sub_db = %self.name,
                wipe_serial,
                outstanding,
                "History wipe blocked by reprocessing"
            );
            return Ok(WipeOutcome::BlockedByReprocessing);
        }

        let c = self.components()?;
        let _guard = self.feed_lock.lock();
        let wiped = match &c.attributes {
            Some(attributes) => attributes.wipe_history(&wipe_schema.field_names())?,
            None => Vec::new(),
        };
        *self.history_schema.lock() = new_history_schema.clone();
        if !wiped.is_empty() {
            info!(sub_db = %self.name, wipe_serial, wiped = ?wiped, "Wiped history");
        }
        Ok(WipeOutcome::Applied { wiped })
    }

    fn set_index_schema(&self, schema: &Schema, fusion_schema: &Schema) -> Result<()> {
        let c = self.components()?;
        *self.fusion_schema.lock() = fusion_schema.clone();
        if let Some(index) = &c.index {
            index.set_schema(schema.union(fusion_schema).index_schema());
        }
        Ok(())
    }

    fn get_searchable_stats(&self) -> SearchableStats {
        let Some(c) = self.components.load_full() else {
            return SearchableStats::default();
        };
        SearchableStats {
            memory_usage: c.memory_usage(),
            docs_in_memory: c.meta.num_docs(),
            size_on_disk: disk_usage(&self.dir).unwrap_or(0),
        }
    }

    fn get_document_retriever(&self) -> Result<Box<dyn DocumentRetriever>> {
        let c = self.components()?;
        let doc_type = self
            .snapshot
            .load_full()
            .map(|s| s.doc_type.clone())
            .unwrap_or_default();
        Ok(Box::new(StoreDocumentRetriever::new(
            doc_type,
            c.meta.clone(),
            c.summary.clone(),
        )))
    }

    fn get_matcher_stats(&self, rank_profile: &str) -> MatchingStats {
        self.matching.get(rank_profile)
    }

    fn take_reprocessing_tasks(&self) -> Vec<Box<dyn ReprocessingTask>> {
        std::mem::take(&mut *self.startup_tasks.lock())
    }

    fn has_pending_reprocessing(&self) -> bool {
        self.reprocessing.outstanding() > 0
    }

    fn reprocessing_tracker(&self) -> Arc<ReprocessingTracker> {
        self.reprocessing.clone()
    }

    fn last_serial(&self) -> SerialNum {
        self.components
            .load_full()
            .map_or(0, |c| c.tracker.last_applied())
    }

    fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.is_closed() {
                return Err(DocDbError::protocol(&self.name, "closed twice"));
            }
            *state = SubDbState::Closing;
        }
        self.clear_views();
        // Drops unrun startup tasks, reporting them abandoned
        self.startup_tasks.lock().clear();
        self.components.store(None);
        self.snapshot.store(None);
        self.sessions.store(None);
        *self.state.lock() = SubDbState::Closed;
        info!(sub_db = %self.name, "Sub-database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexManagerFactory, MemoryIndexManagerFactory};
    use crate::models::{Document, FieldValue};
    use crate::schema::{DataType, FieldSpec};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct TestOwner {
        allow_prune: AtomicBool,
        syncs: AtomicUsize,
    }

    impl SubDbOwner for TestOwner {
        fn sync_feed_view(&self) {
            self.syncs.fetch_add(1, Ordering::SeqCst);
        }
        fn get_index_manager_factory(&self, name: &str) -> Option<Arc<dyn IndexManagerFactory>> {
            (name == "memory").then(|| Arc::new(MemoryIndexManagerFactory) as Arc<dyn IndexManagerFactory>)
        }
        fn get_name(&self) -> &str {
            "music"
        }
        fn get_distribution_key(&self) -> u32 {
            0
        }
        fn get_allow_prune(&self) -> bool {
            self.allow_prune.load(Ordering::SeqCst)
        }
    }

    fn owner() -> Arc<TestOwner> {
        Arc::new(TestOwner {
            allow_prune: AtomicBool::new(true),
            syncs: AtomicUsize::new(0),
        })
    }

    fn snapshot(schema: Schema, generation: u64) -> Arc<ConfigSnapshot> {
        Arc::new(ConfigSnapshot::new(generation, "music", schema))
    }

    fn base_schema() -> Schema {
        Schema::new()
            .field("title", FieldSpec::text())
            .field("year", FieldSpec::attribute(DataType::Int64))
    }

    fn open_ready(tmp: &TempDir, owner: Arc<TestOwner>, snap: &Arc<ConfigSnapshot>) -> StoreSubDb {
        let sub_db = StoreSubDb::new(SubDbType::Ready, tmp.path(), owner, "memory");
        let init = sub_db
            .create_initializer(
                snap,
                snap.serial,
                &snap.schema,
                &SummaryConfig::default(),
                &IndexConfig::default(),
            )
            .unwrap();
        sub_db.setup(init.run().unwrap()).unwrap();
        sub_db
            .init_views(snap.clone(), Arc::new(SessionManager::new()))
            .unwrap();
        sub_db
    }

    fn feed(sub_db: &StoreSubDb, serial: SerialNum, lid: u32, doc: &Document) {
        sub_db
            .get_feed_view()
            .unwrap()
            .handle_put(serial, lid, doc)
            .unwrap();
    }

    #[test]
    fn test_lifecycle_states() {
        let tmp = TempDir::new().unwrap();
        let snap = snapshot(base_schema(), 1);
        let sub_db = StoreSubDb::new(SubDbType::Ready, tmp.path(), owner(), "memory");
        assert_eq!(sub_db.state(), SubDbState::Created);
        assert!(sub_db.get_feed_view().is_none());
        assert!(sub_db.get_search_view().is_none());

        let init = sub_db
            .create_initializer(&snap, 0, &snap.schema, &SummaryConfig::default(), &IndexConfig::default())
            .unwrap();
        assert_eq!(sub_db.state(), SubDbState::Planned);
        sub_db.setup(init.run().unwrap()).unwrap();
        assert_eq!(sub_db.state(), SubDbState::Initialized);

        // A second setup is rejected
        let other = StoreSubDb::new(SubDbType::Ready, &tmp.path().join("other"), owner(), "memory");
        let again = other
            .create_initializer(&snap, 0, &snap.schema, &SummaryConfig::default(), &IndexConfig::default())
            .unwrap()
            .run()
            .unwrap();
        assert!(sub_db.setup(again).unwrap_err().is_fatal());

        sub_db
            .init_views(snap.clone(), Arc::new(SessionManager::new()))
            .unwrap();
        assert!(sub_db.get_feed_view().is_some());
        assert_eq!(sub_db.state(), SubDbState::ViewsActive);
        sub_db.on_replay_done().unwrap();
        assert_eq!(sub_db.state(), SubDbState::Serving);

        sub_db.close().unwrap();
        assert_eq!(sub_db.state(), SubDbState::Closed);
        assert!(sub_db.get_flush_targets().is_empty());
        assert!(sub_db.close().unwrap_err().is_fatal());
        assert!(sub_db.on_replay_done().is_err());
    }

    #[test]
    fn test_unknown_index_factory() {
        let tmp = TempDir::new().unwrap();
        let snap = snapshot(base_schema(), 1);
        let sub_db = StoreSubDb::new(SubDbType::Ready, tmp.path(), owner(), "missing");
        assert!(matches!(
            sub_db.create_initializer(&snap, 0, &snap.schema, &SummaryConfig::default(), &IndexConfig::default()),
            Err(DocDbError::InvalidConfig(_))
        ));
        assert_eq!(sub_db.state(), SubDbState::Created);
    }

    #[test]
    fn test_feed_flush_and_bounds() {
        let tmp = TempDir::new().unwrap();
        let snap = snapshot(base_schema(), 1);
        let sub_db = open_ready(&tmp, owner(), &snap);
        for serial in 1..=10u64 {
            let doc = Document::new(format!("id:{}", serial))
                .with_field("title", "blue moon")
                .with_field("year", 1990 + serial as i64);
            feed(&sub_db, serial, serial as u32, &doc);
        }
        assert_eq!(sub_db.get_num_docs(), 10);
        assert_eq!(sub_db.get_num_active_docs(), 10);
        assert!(sub_db.has_document(&DocumentId::new("id:3")));
        assert_eq!(sub_db.get_oldest_flushed_serial(), 0);

        for target in sub_db.get_flush_targets() {
            target.flush(6).unwrap();
        }
        assert_eq!(sub_db.get_oldest_flushed_serial(), 6);
        assert_eq!(sub_db.get_newest_flushed_serial(), 6);
        assert!(sub_db.get_oldest_flushed_serial() <= sub_db.last_serial());

        let view = sub_db.get_search_view().unwrap();
        assert_eq!(view.match_term("default", "title", "moon").unwrap().len(), 10);
        assert_eq!(sub_db.get_matcher_stats("default").queries, 1);
        assert!(sub_db.get_searchable_stats().size_on_disk > 0);
        let retriever = sub_db.get_document_retriever().unwrap();
        assert_eq!(retriever.doc_type(), "music");
        assert!(retriever.get_document(&DocumentId::new("id:4")).is_some());
    }

    #[test]
    fn test_apply_identical_config_gives_no_tasks() {
        let tmp = TempDir::new().unwrap();
        let snap = snapshot(base_schema(), 1);
        let owner = owner();
        let sub_db = open_ready(&tmp, owner.clone(), &snap);
        let same = Arc::new((*snap).clone().with_serial(5));
        let params = ReconfigParams::new(&snap, &same);
        assert!(sub_db.apply_config(&same, &snap, 5, &params).unwrap().is_empty());
        assert_eq!(owner.syncs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_added_attribute_produces_one_task() {
        let tmp = TempDir::new().unwrap();
        let snap = snapshot(base_schema(), 1);
        let owner = owner();
        let sub_db = open_ready(&tmp, owner.clone(), &snap);
        feed(&sub_db, 1, 1, &Document::new("id:a").with_field("rating", 4.5));
        sub_db.on_replay_done().unwrap();

        let new = snapshot(
            base_schema().field("rating", FieldSpec::attribute(DataType::Float64)),
            2,
        );
        let params = ReconfigParams::new(&snap, &new);
        sub_db.get_feed_view().unwrap().handle_noop(2).unwrap();
        let mut tasks = sub_db.apply_config(&new, &snap, 2, &params).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].serial(), 2);
        assert_eq!(owner.syncs.load(Ordering::SeqCst), 1);
        assert!(!sub_db.on_reprocess_done(2).unwrap());
        assert!(sub_db.has_pending_reprocessing());

        // Wipes are blocked while the task is outstanding
        let outcome = sub_db.wipe_history(2, &Schema::new(), &Schema::new()).unwrap();
        assert_eq!(outcome, WipeOutcome::BlockedByReprocessing);

        let mut task = tasks.pop().unwrap();
        task.run(&AtomicBool::new(false)).unwrap();
        drop(task);
        assert!(sub_db.on_reprocess_done(2).unwrap());
        assert_eq!(
            sub_db.get_attribute_manager().unwrap().get_value("rating", 1),
            Some(FieldValue::Double(4.5))
        );
    }

    #[test]
    fn test_wipe_history() {
        let tmp = TempDir::new().unwrap();
        let snap = snapshot(base_schema(), 1);
        let owner = owner();
        let sub_db = open_ready(&tmp, owner.clone(), &snap);
        sub_db.on_replay_done().unwrap();

        let without_year = snapshot(Schema::new().field("title", FieldSpec::text()), 2);
        let params = ReconfigParams::new(&snap, &without_year);
        assert!(sub_db.apply_config(&without_year, &snap, 1, &params).unwrap().is_empty());
        let attributes = sub_db.get_attribute_manager().unwrap();
        assert!(attributes.history_specs().contains_key("year"));

        let wipe_schema = base_schema().difference(&without_year.schema);
        owner.allow_prune.store(false, Ordering::SeqCst);
        let oldest = sub_db.get_oldest_flushed_serial();
        let newest = sub_db.get_newest_flushed_serial();
        assert_eq!(
            sub_db.wipe_history(2, &Schema::new(), &wipe_schema).unwrap(),
            WipeOutcome::Denied
        );
        assert!(attributes.history_specs().contains_key("year"));
        assert_eq!(sub_db.get_oldest_flushed_serial(), oldest);
        assert_eq!(sub_db.get_newest_flushed_serial(), newest);

        owner.allow_prune.store(true, Ordering::SeqCst);
        assert_eq!(
            sub_db.wipe_history(2, &Schema::new(), &wipe_schema).unwrap(),
            WipeOutcome::Applied {
                wiped: vec!["year".to_string()]
            }
        );
        assert!(attributes.history_specs().is_empty());
    }

    #[test]
    fn test_wipe_requires_serving() {
        let tmp = TempDir::new().unwrap();
        let snap = snapshot(base_schema(), 1);
        let sub_db = open_ready(&tmp, owner(), &snap);
        assert!(sub_db
            .wipe_history(1, &Schema::new(), &Schema::new())
            .unwrap_err()
            .is_fatal());
    }
}

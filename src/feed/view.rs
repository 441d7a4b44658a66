use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::attribute::AttributeManager;
use crate::error::Result;
use crate::index::IndexWriter;
use crate::metastore::{DocumentMetaStoreContext, Lid};
use crate::models::{Document, DocumentId, DocumentUpdate};
use crate::reconfig::ConfigSnapshot;
use crate::serial::{SerialNum, SerialTracker};
use crate::summary::SummaryAdapter;

/// Write path of one sub-database.
///
/// Every call carries the serial of the logged operation. Serials at or
/// below the replay floor are already contained in the flushed state and
/// are skipped; anything else must be strictly increasing.
pub trait FeedView: Send + Sync {
    fn sub_db_id(&self) -> u32;

    fn snapshot(&self) -> &Arc<ConfigSnapshot>;

    fn handle_put(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()>;

    fn handle_update(
        &self,
        serial: SerialNum,
        lid: Lid,
        id: &DocumentId,
        update: &DocumentUpdate,
    ) -> Result<()>;

    fn handle_remove(&self, serial: SerialNum, lid: Lid, id: &DocumentId) -> Result<()>;

    /// Operation for another sub-database; only the serial moves
    fn handle_noop(&self, serial: SerialNum) -> Result<()>;

    fn last_serial(&self) -> SerialNum;
}

/// Subsystem handles a feed view writes through. Survives view swaps.
#[derive(Clone)]
pub struct FeedViewContext {
    pub sub_db_id: u32,
    pub sub_db_name: String,
    /// Whether documents fed here are visible to search
    pub active_docs: bool,
    pub meta: DocumentMetaStoreContext,
    pub summary: Option<SummaryAdapter>,
    pub attributes: Option<Arc<dyn AttributeManager>>,
    pub index: Option<IndexWriter>,
    pub tracker: Arc<SerialTracker>,
    pub replay_floor: SerialNum,
    /// Held for every write, shared with reprocessing tasks
    pub feed_lock: Arc<Mutex<()>>,
}

pub struct StoreFeedView {
    ctx: FeedViewContext,
    snapshot: Arc<ConfigSnapshot>,
}

impl StoreFeedView {
    pub fn new(ctx: FeedViewContext, snapshot: Arc<ConfigSnapshot>) -> Self {
        Self { ctx, snapshot }
    }

    fn accept(&self, serial: SerialNum) -> Result<bool> {
        if serial <= self.ctx.replay_floor {
            return Ok(false);
        }
        self.ctx.tracker.advance(serial)?;
        Ok(true)
    }

    fn write_document(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()> {
        let ctx = &self.ctx;
        ctx.meta.put(
            serial,
            lid,
            &doc.id,
            doc.timestamp,
            doc.size_bytes() as u32,
            ctx.active_docs,
        )?;
        if let Some(summary) = &ctx.summary {
            summary.put(serial, lid, doc)?;
        }
        if let Some(attributes) = &ctx.attributes {
            attributes.put(serial, lid, doc)?;
        }
        if let Some(index) = &ctx.index {
            index.put(serial, lid, doc)?;
        }
        Ok(())
    }
}

impl FeedView for StoreFeedView {
    fn sub_db_id(&self) -> u32 {
        self.ctx.sub_db_id
    }

    fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    fn handle_put(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()> {
        let _guard = self.ctx.feed_lock.lock();
        if !self.accept(serial)? {
            return Ok(());
        }
        trace!(sub_db = %self.ctx.sub_db_name, serial, lid, doc = %doc.id, "put");
        self.write_document(serial, lid, doc)
    }

    fn handle_update(
        &self,
        serial: SerialNum,
        lid: Lid,
        id: &DocumentId,
        update: &DocumentUpdate,
    ) -> Result<()> {
        let _guard = self.ctx.feed_lock.lock();
        if !self.accept(serial)? {
            return Ok(());
        }
        // A replayed update may find the lid already reused; later records
        // in the log bring every store to the same final state.
        let mut doc = self
            .ctx
            .summary
            .as_ref()
            .and_then(|s| s.get(lid))
            .filter(|d| &d.id == id)
            .map(|d| (*d).clone())
            .unwrap_or_else(|| Document {
                id: id.clone(),
                fields: Default::default(),
                timestamp: 0,
            });
        update.apply_to(&mut doc);
        trace!(sub_db = %self.ctx.sub_db_name, serial, lid, doc = %id, "update");
        self.write_document(serial, lid, &doc)
    }

    fn handle_remove(&self, serial: SerialNum, lid: Lid, id: &DocumentId) -> Result<()> {
        let _guard = self.ctx.feed_lock.lock();
        if !self.accept(serial)? {
            return Ok(());
        }
        trace!(sub_db = %self.ctx.sub_db_name, serial, lid, doc = %id, "remove");
        let ctx = &self.ctx;
        ctx.meta.remove(serial, lid)?;
        if let Some(summary) = &ctx.summary {
            summary.remove(serial, lid)?;
        }
        if let Some(attributes) = &ctx.attributes {
            attributes.remove(serial, lid)?;
        }
        if let Some(index) = &ctx.index {
            index.remove(serial, lid)?;
        }
        Ok(())
    }

    fn handle_noop(&self, serial: SerialNum) -> Result<()> {
        let _guard = self.ctx.feed_lock.lock();
        if !self.accept(serial)? {
            return Ok(());
        }
        let ctx = &self.ctx;
        ctx.meta.raise_serial(serial);
        if let Some(summary) = &ctx.summary {
            summary.raise_serial(serial);
        }
        if let Some(attributes) = &ctx.attributes {
            attributes.raise_serial(serial);
        }
        if let Some(index) = &ctx.index {
            index.raise_serial(serial);
        }
        Ok(())
    }

    fn last_serial(&self) -> SerialNum {
        self.ctx.tracker.last_applied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryConfig;
    use crate::schema::Schema;
    use crate::summary::{LoggedSummaryManager, SummaryManager};
    use tempfile::TempDir;

    fn view(tmp: &TempDir, floor: SerialNum) -> (StoreFeedView, Arc<dyn SummaryManager>) {
        let meta = DocumentMetaStoreContext::open("notready", tmp.path().join("meta")).unwrap();
        let summary: Arc<dyn SummaryManager> = Arc::new(
            LoggedSummaryManager::open(
                "notready",
                tmp.path().join("summary"),
                &SummaryConfig::default(),
                Default::default(),
            )
            .unwrap(),
        );
        let ctx = FeedViewContext {
            sub_db_id: 2,
            sub_db_name: "notready".to_string(),
            active_docs: false,
            meta,
            summary: Some(SummaryAdapter::new(summary.clone())),
            attributes: None,
            index: None,
            tracker: Arc::new(SerialTracker::new("notready", floor)),
            replay_floor: floor,
            feed_lock: Arc::new(Mutex::new(())),
        };
        let snapshot = Arc::new(ConfigSnapshot::new(1, "music", Schema::new()));
        (StoreFeedView::new(ctx, snapshot), summary)
    }

    #[test]
    fn test_put_update_remove() {
        let tmp = TempDir::new().unwrap();
        let (view, summary) = view(&tmp, 0);
        let id = DocumentId::new("id:a");

        view.handle_put(1, 1, &Document::new("id:a").with_field("title", "one"))
            .unwrap();
        view.handle_update(2, 1, &id, &DocumentUpdate::new().assign("year", 2001i64))
            .unwrap();
        let stored = summary.get(1).unwrap();
        assert_eq!(stored.fields.len(), 2);

        view.handle_remove(3, 1, &id).unwrap();
        assert!(summary.get(1).is_none());
        view.handle_noop(4).unwrap();
        assert_eq!(view.last_serial(), 4);
    }

    #[test]
    fn test_replay_floor_and_ordering() {
        let tmp = TempDir::new().unwrap();
        let (view, summary) = view(&tmp, 10);
        // Contained in flushed state
        view.handle_put(9, 1, &Document::new("id:old")).unwrap();
        assert!(summary.get(1).is_none());
        assert_eq!(view.last_serial(), 10);

        view.handle_put(11, 1, &Document::new("id:new")).unwrap();
        let err = view.handle_noop(11).unwrap_err();
        assert!(err.is_fatal());
    }
}

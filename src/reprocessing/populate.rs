use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::task::{ReprocessingTask, TaskOutcome};
use crate::attribute::AttributeVector;
use crate::error::Result;
use crate::metastore::DocumentMetaStoreContext;
use crate::serial::SerialNum;
use crate::summary::SummaryManager;

const DEFAULT_BATCH_SIZE: usize = 256;

/// Fill a new attribute vector from the documents in the summary store.
///
/// Runs in batches, each under the sub-database feed lock so a batch never
/// interleaves with a concurrent put of the same lid. Re-running from the
/// start is always safe.
pub struct AttributePopulateTask {
    sub_db_id: u32,
    serial: SerialNum,
    vector: Arc<AttributeVector>,
    meta: DocumentMetaStoreContext,
    summary: Arc<dyn SummaryManager>,
    feed_lock: Arc<Mutex<()>>,
    batch_size: usize,
}

impl AttributePopulateTask {
    pub fn new(
        sub_db_id: u32,
        serial: SerialNum,
        vector: Arc<AttributeVector>,
        meta: DocumentMetaStoreContext,
        summary: Arc<dyn SummaryManager>,
        feed_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            sub_db_id,
            serial,
            vector,
            meta,
            summary,
            feed_lock,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl ReprocessingTask for AttributePopulateTask {
    fn description(&self) -> String {
        format!("populate attribute '{}'", self.vector.name())
    }

    fn serial(&self) -> SerialNum {
        self.serial
    }

    fn sub_db_id(&self) -> u32 {
        self.sub_db_id
    }

    fn run(&mut self, cancel: &AtomicBool) -> Result<TaskOutcome> {
        let lids = self.meta.lids();
        let mut populated = 0usize;
        for batch in lids.chunks(self.batch_size) {
            if cancel.load(Ordering::SeqCst) {
                debug!(attribute = self.vector.name(), populated, "Population cancelled");
                return Ok(TaskOutcome::Abandoned);
            }
            let _guard = self.feed_lock.lock();
            for &lid in batch {
                // Removed since the lid list was taken
                if self.meta.get_entry(lid).is_none() {
                    continue;
                }
                let doc = self.summary.get(lid);
                self.vector.populate(lid, doc.as_deref())?;
                populated += 1;
            }
        }
        let _guard = self.feed_lock.lock();
        self.vector.mark_populated()?;
        debug!(
            attribute = self.vector.name(),
            serial = self.serial,
            populated,
            "Populated attribute"
        );
        Ok(TaskOutcome::Completed)
    }
}

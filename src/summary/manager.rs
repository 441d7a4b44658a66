use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::SummaryConfig;
use crate::error::Result;
use crate::flush::{FlushComponent, FlushTargetList, StoreFlushTarget};
use crate::metastore::Lid;
use crate::models::Document;
use crate::persistence::{LoggedStore, StoreState};
use crate::serial::SerialNum;

/// Stored documents of one sub-database
#[derive(Default, Serialize, Deserialize)]
pub struct SummaryState {
    docs: BTreeMap<Lid, Document>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SummaryOp {
    Put { lid: Lid, doc: Document },
    Remove { lid: Lid },
}

impl StoreState for SummaryState {
    type Op = SummaryOp;

    fn apply(&mut self, op: &SummaryOp) {
        match op {
            SummaryOp::Put { lid, doc } => {
                self.docs.insert(*lid, doc.clone());
            }
            SummaryOp::Remove { lid } => {
                self.docs.remove(lid);
            }
        }
    }

    fn memory_usage(&self) -> usize {
        self.docs.values().map(|d| d.size_bytes()).sum()
    }
}

/// Document store backing summaries and reprocessing.
pub trait SummaryManager: Send + Sync {
    /// Full stored document
    fn get(&self, lid: Lid) -> Option<Arc<Document>>;

    /// Document reduced to the configured summary fields
    fn get_summary(&self, lid: Lid) -> Option<Document>;

    fn put(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()>;

    fn remove(&self, serial: SerialNum, lid: Lid) -> Result<()>;

    fn raise_serial(&self, serial: SerialNum);

    /// Swap the set of fields returned by `get_summary`
    fn set_summary_fields(&self, fields: BTreeSet<String>);

    fn summary_fields(&self) -> Arc<BTreeSet<String>>;

    fn num_docs(&self) -> usize;

    fn flush_targets(&self) -> FlushTargetList;

    fn memory_usage(&self) -> usize;
}

/// Summary manager over a logged store with a bounded read cache
pub struct LoggedSummaryManager {
    store: Arc<LoggedStore<SummaryState>>,
    fields: ArcSwap<BTreeSet<String>>,
    cache: DashMap<Lid, Arc<Document>>,
    cache_max_docs: usize,
}

impl LoggedSummaryManager {
    pub fn open(
        sub_db_name: &str,
        dir: PathBuf,
        config: &SummaryConfig,
        fields: BTreeSet<String>,
    ) -> Result<Self> {
        let store = LoggedStore::open(format!("{}.summary", sub_db_name), dir)?;
        Ok(Self {
            store: Arc::new(store),
            fields: ArcSwap::from_pointee(fields),
            cache: DashMap::new(),
            cache_max_docs: config.cache_max_docs,
        })
    }

    fn cache_insert(&self, lid: Lid, doc: Arc<Document>) {
        if self.cache_max_docs == 0 {
            return;
        }
        if self.cache.len() >= self.cache_max_docs {
            // Evict an arbitrary entry; the cache only saves store lookups
            let victim = self.cache.iter().next().map(|e| *e.key());
            if let Some(victim) = victim {
                self.cache.remove(&victim);
            }
        }
        self.cache.insert(lid, doc);
    }

    pub fn cached_docs(&self) -> usize {
        self.cache.len()
    }
}

impl SummaryManager for LoggedSummaryManager {
    fn get(&self, lid: Lid) -> Option<Arc<Document>> {
        if let Some(doc) = self.cache.get(&lid) {
            return Some(doc.clone());
        }
        let doc = Arc::new(self.store.read(|s| s.docs.get(&lid).cloned())?);
        self.cache_insert(lid, doc.clone());
        Some(doc)
    }

    fn get_summary(&self, lid: Lid) -> Option<Document> {
        let doc = self.get(lid)?;
        let fields = self.fields.load();
        let mut summary = (*doc).clone();
        summary.fields.retain(|name, _| fields.contains(name));
        Some(summary)
    }

    fn put(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()> {
        self.store.apply(
            serial,
            &SummaryOp::Put {
                lid,
                doc: doc.clone(),
            },
        )?;
        self.cache.remove(&lid);
        Ok(())
    }

    fn remove(&self, serial: SerialNum, lid: Lid) -> Result<()> {
        self.store.apply(serial, &SummaryOp::Remove { lid })?;
        self.cache.remove(&lid);
        Ok(())
    }

    fn raise_serial(&self, serial: SerialNum) {
        self.store.raise_serial(serial);
    }

    fn set_summary_fields(&self, fields: BTreeSet<String>) {
        self.fields.store(Arc::new(fields));
    }

    fn summary_fields(&self) -> Arc<BTreeSet<String>> {
        self.fields.load_full()
    }

    fn num_docs(&self) -> usize {
        self.store.read(|s| s.docs.len())
    }

    fn flush_targets(&self) -> FlushTargetList {
        vec![
            StoreFlushTarget::new(self.store.name().to_string(), FlushComponent::Summary, &self.store)
                .into_target(),
        ]
    }

    fn memory_usage(&self) -> usize {
        self.store.memory_usage()
    }
}

/// Write path into the summary store used by feed views
#[derive(Clone)]
pub struct SummaryAdapter {
    manager: Arc<dyn SummaryManager>,
}

impl SummaryAdapter {
    pub fn new(manager: Arc<dyn SummaryManager>) -> Self {
        Self { manager }
    }

    pub fn put(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()> {
        self.manager.put(serial, lid, doc)
    }

    pub fn remove(&self, serial: SerialNum, lid: Lid) -> Result<()> {
        self.manager.remove(serial, lid)
    }

    pub fn get(&self, lid: Lid) -> Option<Arc<Document>> {
        self.manager.get(lid)
    }

    pub fn raise_serial(&self, serial: SerialNum) {
        self.manager.raise_serial(serial);
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tokenizer::Tokenizer;
use crate::config::IndexConfig;
use crate::error::Result;
use crate::flush::{FlushComponent, FlushTargetList, StoreFlushTarget};
use crate::metastore::Lid;
use crate::models::Document;
use crate::persistence::{LoggedStore, StoreState};
use crate::schema::Schema;
use crate::serial::SerialNum;

/// Posting lists keyed by `field:term`
#[derive(Default, Serialize, Deserialize)]
pub struct MemoryIndexState {
    postings: BTreeMap<String, RoaringBitmap>,
    doc_terms: BTreeMap<Lid, Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum IndexOp {
    Insert { lid: Lid, terms: Vec<String> },
    Remove { lid: Lid },
}

impl MemoryIndexState {
    fn remove_lid(&mut self, lid: Lid) {
        let Some(terms) = self.doc_terms.remove(&lid) else {
            return;
        };
        for term in terms {
            if let Some(posting) = self.postings.get_mut(&term) {
                posting.remove(lid);
                if posting.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }
}

impl StoreState for MemoryIndexState {
    type Op = IndexOp;

    fn apply(&mut self, op: &IndexOp) {
        match op {
            IndexOp::Insert { lid, terms } => {
                self.remove_lid(*lid);
                for term in terms {
                    self.postings.entry(term.clone()).or_default().insert(*lid);
                }
                self.doc_terms.insert(*lid, terms.clone());
            }
            IndexOp::Remove { lid } => self.remove_lid(*lid),
        }
    }

    fn memory_usage(&self) -> usize {
        self.postings
            .iter()
            .map(|(term, posting)| term.len() + posting.serialized_size())
            .sum::<usize>()
            + self.doc_terms.len() * 32
    }
}

/// Text index of one sub-database
pub trait IndexManager: Send + Sync {
    fn schema(&self) -> Arc<Schema>;

    /// Switch the indexed field set for documents fed from now on
    fn set_schema(&self, schema: Schema);

    fn put_document(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()>;

    fn remove_document(&self, serial: SerialNum, lid: Lid) -> Result<()>;

    fn raise_serial(&self, serial: SerialNum);

    /// Lids whose `field` contains `term`
    fn lookup(&self, field: &str, term: &str) -> RoaringBitmap;

    fn num_docs(&self) -> usize;

    fn flush_targets(&self) -> FlushTargetList;

    fn memory_usage(&self) -> usize;
}

/// Everything an index manager factory needs to build a manager
#[derive(Clone, Debug)]
pub struct IndexManagerParams {
    pub sub_db_name: String,
    pub dir: PathBuf,
    pub schema: Schema,
    pub config: IndexConfig,
}

/// Builds index managers; resolved by name through the sub-database owner
pub trait IndexManagerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, params: IndexManagerParams) -> Result<Arc<dyn IndexManager>>;
}

/// Memory index persisted through a logged store
pub struct MemoryIndexManager {
    store: Arc<LoggedStore<MemoryIndexState>>,
    schema: ArcSwap<Schema>,
    tokenizer: Tokenizer,
}

impl MemoryIndexManager {
    pub fn open(params: IndexManagerParams) -> Result<Self> {
        let store = LoggedStore::open(format!("{}.index", params.sub_db_name), params.dir)?;
        Ok(Self {
            store: Arc::new(store),
            schema: ArcSwap::from_pointee(params.schema),
            tokenizer: Tokenizer::new(&params.config),
        })
    }

    fn terms(&self, doc: &Document) -> Vec<String> {
        let schema = self.schema.load();
        let mut terms = Vec::new();
        for field in schema.index_fields() {
            let Some(text) = doc.get(&field).and_then(|v| v.as_text()) else {
                continue;
            };
            for term in self.tokenizer.unique_terms(text) {
                terms.push(format!("{}:{}", field, term));
            }
        }
        terms
    }
}

impl IndexManager for MemoryIndexManager {
    fn schema(&self) -> Arc<Schema> {
        self.schema.load_full()
    }

    fn set_schema(&self, schema: Schema) {
        debug!(store = %self.store.name(), fields = ?schema.index_fields(), "Setting index schema");
        self.schema.store(Arc::new(schema));
    }

    fn put_document(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()> {
        let terms = self.terms(doc);
        self.store.apply(serial, &IndexOp::Insert { lid, terms })?;
        Ok(())
    }

    fn remove_document(&self, serial: SerialNum, lid: Lid) -> Result<()> {
        self.store.apply(serial, &IndexOp::Remove { lid })?;
        Ok(())
    }

    fn raise_serial(&self, serial: SerialNum) {
        self.store.raise_serial(serial);
    }

    fn lookup(&self, field: &str, term: &str) -> RoaringBitmap {
        // Normalize the query term the same way indexed text is
        let Some(term) = self.tokenizer.tokenize(term).into_iter().next() else {
            return RoaringBitmap::new();
        };
        let key = format!("{}:{}", field, term);
        self.store
            .read(|s| s.postings.get(&key).cloned())
            .unwrap_or_default()
    }

    fn num_docs(&self) -> usize {
        self.store.read(|s| s.doc_terms.len())
    }

    fn flush_targets(&self) -> FlushTargetList {
        vec![
            StoreFlushTarget::new(self.store.name().to_string(), FlushComponent::Index, &self.store)
                .into_target(),
        ]
    }

    fn memory_usage(&self) -> usize {
        self.store.memory_usage()
    }
}

/// Default factory producing `MemoryIndexManager`s
#[derive(Debug, Default)]
pub struct MemoryIndexManagerFactory;

impl IndexManagerFactory for MemoryIndexManagerFactory {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(&self, params: IndexManagerParams) -> Result<Arc<dyn IndexManager>> {
        Ok(Arc::new(MemoryIndexManager::open(params)?))
    }
}

/// Write path into the index used by feed views
#[derive(Clone)]
pub struct IndexWriter {
    manager: Arc<dyn IndexManager>,
}

impl IndexWriter {
    pub fn new(manager: Arc<dyn IndexManager>) -> Self {
        Self { manager }
    }

    pub fn put(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()> {
        self.manager.put_document(serial, lid, doc)
    }

    pub fn remove(&self, serial: SerialNum, lid: Lid) -> Result<()> {
        self.manager.remove_document(serial, lid)
    }

    pub fn raise_serial(&self, serial: SerialNum) {
        self.manager.raise_serial(serial);
    }

    pub fn index_manager(&self) -> &Arc<dyn IndexManager> {
        &self.manager
    }
}

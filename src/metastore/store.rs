use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::error::{DocDbError, Result};
use crate::flush::{FlushComponent, FlushTarget, StoreFlushTarget};
use crate::models::DocumentId;
use crate::persistence::{LoggedStore, StoreState};
use crate::serial::SerialNum;

/// Local document id within one sub-database
pub type Lid = u32;

/// Metadata kept for every live document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub doc_id: DocumentId,
    pub timestamp: u64,
    /// Serial of the last operation that touched the document
    pub serial: SerialNum,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaOp {
    Put {
        lid: Lid,
        entry: MetaEntry,
        active: bool,
    },
    Remove {
        lid: Lid,
    },
}

#[derive(Default, Serialize, Deserialize)]
pub struct MetaStoreState {
    lids: BTreeMap<DocumentId, Lid>,
    entries: BTreeMap<Lid, MetaEntry>,
    free_lids: Vec<Lid>,
    next_lid: Lid,
    active: RoaringBitmap,
}

impl MetaStoreState {
    /// Lid the next put of `doc_id` will use
    pub fn peek_lid(&self, doc_id: &DocumentId) -> Lid {
        if let Some(lid) = self.lids.get(doc_id) {
            return *lid;
        }
        if let Some(lid) = self.free_lids.last() {
            return *lid;
        }
        self.next_lid.max(1)
    }

    pub fn get_lid(&self, doc_id: &DocumentId) -> Option<Lid> {
        self.lids.get(doc_id).copied()
    }

    pub fn get(&self, lid: Lid) -> Option<&MetaEntry> {
        self.entries.get(&lid)
    }

    pub fn num_docs(&self) -> usize {
        self.entries.len()
    }

    pub fn num_active(&self) -> usize {
        self.active.len() as usize
    }

    pub fn is_active(&self, lid: Lid) -> bool {
        self.active.contains(lid)
    }

    pub fn lids(&self) -> Vec<Lid> {
        self.entries.keys().copied().collect()
    }
}

impl StoreState for MetaStoreState {
    type Op = MetaOp;

    fn apply(&mut self, op: &MetaOp) {
        match op {
            MetaOp::Put { lid, entry, active } => {
                if let Some(pos) = self.free_lids.iter().position(|l| l == lid) {
                    self.free_lids.remove(pos);
                }
                self.next_lid = self.next_lid.max(lid + 1);
                self.lids.insert(entry.doc_id.clone(), *lid);
                self.entries.insert(*lid, entry.clone());
                if *active {
                    self.active.insert(*lid);
                } else {
                    self.active.remove(*lid);
                }
            }
            MetaOp::Remove { lid } => {
                if let Some(entry) = self.entries.remove(lid) {
                    self.lids.remove(&entry.doc_id);
                    self.active.remove(*lid);
                    self.free_lids.push(*lid);
                }
            }
        }
    }

    fn memory_usage(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.doc_id.0.len() * 2 + 48)
            .sum::<usize>()
            + self.free_lids.len() * 4
    }
}

/// Handle to one sub-database's meta store
#[derive(Clone)]
pub struct DocumentMetaStoreContext {
    store: Arc<LoggedStore<MetaStoreState>>,
}

impl DocumentMetaStoreContext {
    pub fn open(sub_db_name: &str, dir: PathBuf) -> Result<Self> {
        let store = LoggedStore::open(format!("{}.documentmetastore", sub_db_name), dir)?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Make the next logged change to this store fail
    #[cfg(any(test, feature = "testing"))]
    pub fn fail_next_apply(&self) {
        self.store.fail_next_apply();
    }

    /// Lid a put of `doc_id` would use right now
    pub fn peek_lid(&self, doc_id: &DocumentId) -> Lid {
        self.store.read(|s| s.peek_lid(doc_id))
    }

    /// Record a put of `doc_id` at `lid`. Returns false when `serial` is
    /// already contained in the store.
    pub fn put(
        &self,
        serial: SerialNum,
        lid: Lid,
        doc_id: &DocumentId,
        timestamp: u64,
        size: u32,
        active: bool,
    ) -> Result<bool> {
        if lid == 0 {
            return Err(DocDbError::protocol(
                self.store.name(),
                format!("lid 0 is reserved (document {})", doc_id),
            ));
        }
        let op = MetaOp::Put {
            lid,
            entry: MetaEntry {
                doc_id: doc_id.clone(),
                timestamp,
                serial,
                size,
            },
            active,
        };
        self.store.apply(serial, &op)
    }

    /// Record a remove of `lid` at `serial`
    pub fn remove(&self, serial: SerialNum, lid: Lid) -> Result<bool> {
        self.store.apply(serial, &MetaOp::Remove { lid })
    }

    pub fn get_lid(&self, doc_id: &DocumentId) -> Option<Lid> {
        self.store.read(|s| s.get_lid(doc_id))
    }

    pub fn get_entry(&self, lid: Lid) -> Option<MetaEntry> {
        self.store.read(|s| s.get(lid).cloned())
    }

    pub fn has_document(&self, doc_id: &DocumentId) -> bool {
        self.get_lid(doc_id).is_some()
    }

    pub fn is_active(&self, lid: Lid) -> bool {
        self.store.read(|s| s.is_active(lid))
    }

    pub fn num_docs(&self) -> usize {
        self.store.read(|s| s.num_docs())
    }

    pub fn num_active_docs(&self) -> usize {
        self.store.read(|s| s.num_active())
    }

    pub fn lids(&self) -> Vec<Lid> {
        self.store.read(|s| s.lids())
    }

    pub fn last_applied(&self) -> SerialNum {
        self.store.last_applied()
    }

    pub fn raise_serial(&self, serial: SerialNum) {
        self.store.raise_serial(serial);
    }

    pub fn memory_usage(&self) -> usize {
        self.store.memory_usage()
    }

    pub fn flush_target(&self) -> Arc<dyn FlushTarget> {
        StoreFlushTarget::new(
            self.store.name().to_string(),
            FlushComponent::DocumentMetaStore,
            &self.store,
        )
        .into_target()
    }

    pub fn store(&self) -> &Arc<LoggedStore<MetaStoreState>> {
        &self.store
    }
}

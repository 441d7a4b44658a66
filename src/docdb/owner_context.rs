use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::index::{IndexManagerFactory, MemoryIndexManagerFactory};
use crate::owner::SubDbOwner;

/// What the sub-databases see of their document database. Holds no
/// reference to the sub-databases themselves.
pub struct SubDbOwnerContext {
    name: String,
    distribution_key: u32,
    allow_prune: RwLock<bool>,
    factories: DashMap<String, Arc<dyn IndexManagerFactory>>,
    feed_view_syncs: AtomicU64,
}

impl SubDbOwnerContext {
    /// Context with the built-in `memory` index manager factory registered
    pub fn new(name: impl Into<String>, distribution_key: u32, allow_prune: bool) -> Self {
        let ctx = Self {
            name: name.into(),
            distribution_key,
            allow_prune: RwLock::new(allow_prune),
            factories: DashMap::new(),
            feed_view_syncs: AtomicU64::new(0),
        };
        ctx.register_index_manager_factory(Arc::new(MemoryIndexManagerFactory));
        ctx
    }

    /// Register `factory` under its own name, replacing any previous one
    pub fn register_index_manager_factory(&self, factory: Arc<dyn IndexManagerFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    /// Waits for any held prune decision to be released
    pub fn set_allow_prune(&self, allow: bool) {
        *self.allow_prune.write() = allow;
    }

    /// Current prune permission, fixed until the guard is dropped
    pub fn hold_prune_decision(&self) -> RwLockReadGuard<'_, bool> {
        self.allow_prune.read()
    }

    /// Number of feed view swaps reported by sub-databases
    pub fn feed_view_syncs(&self) -> u64 {
        self.feed_view_syncs.load(Ordering::SeqCst)
    }
}

impl SubDbOwner for SubDbOwnerContext {
    fn sync_feed_view(&self) {
        let syncs = self.feed_view_syncs.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(docdb = %self.name, syncs, "Feed view replaced");
    }

    fn get_index_manager_factory(&self, name: &str) -> Option<Arc<dyn IndexManagerFactory>> {
        self.factories.get(name).map(|f| f.value().clone())
    }

    fn get_name(&self) -> &str {
        &self.name
    }

    fn get_distribution_key(&self) -> u32 {
        self.distribution_key
    }

    fn get_allow_prune(&self) -> bool {
        // Recursive so callers holding a prune decision can ask again
        *self.allow_prune.read_recursive()
    }
}

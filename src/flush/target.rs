use std::fmt;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::error::{DocDbError, Result};
use crate::persistence::{FlushBounds, LoggedStore, StoreState};
use crate::serial::SerialNum;

/// What kind of work a flush performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlushTargetType {
    /// Writes in-memory state to disk
    Flush,
    /// Rewrites existing on-disk state into a smaller form
    Gc,
}

/// Which subsystem a flush target belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlushComponent {
    Index,
    Attribute,
    Summary,
    DocumentMetaStore,
}

impl fmt::Display for FlushComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushComponent::Index => "index",
            FlushComponent::Attribute => "attribute",
            FlushComponent::Summary => "summary",
            FlushComponent::DocumentMetaStore => "documentmetastore",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful flush
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlushStats {
    pub target: String,
    pub flushed_serial: SerialNum,
    pub bytes_released: u64,
}

/// A persistable facet of a subsystem.
///
/// All getters are cheap and never touch disk. `flush` persists every
/// mutation up to and including the target serial (clamped to what has
/// been applied) and only then advances the reported bounds. A failed
/// flush leaves the bounds as they were, so retrying is safe.
pub trait FlushTarget: Send + Sync {
    fn name(&self) -> &str;

    fn target_type(&self) -> FlushTargetType;

    fn component(&self) -> FlushComponent;

    /// Serial below which this target holds no unflushed state.
    fn flushed_serial(&self) -> SerialNum;

    /// Highest serial this target has persisted.
    fn newest_flushed_serial(&self) -> SerialNum {
        self.flushed_serial()
    }

    /// Bytes that a flush would free from memory or the change log.
    fn approx_memory_gain(&self) -> u64;

    fn last_flush_time(&self) -> Option<SystemTime>;

    fn flush(&self, target_serial: SerialNum) -> Result<FlushStats>;
}

pub type FlushTargetList = Vec<Arc<dyn FlushTarget>>;

/// Minimum flushed serial over `targets`, or `fallback` when there are none.
pub fn oldest_flushed_serial(targets: &[Arc<dyn FlushTarget>], fallback: SerialNum) -> SerialNum {
    targets
        .iter()
        .map(|t| t.flushed_serial())
        .min()
        .unwrap_or(fallback)
}

/// Maximum newest-flushed serial over `targets`, 0 when there are none.
pub fn newest_flushed_serial(targets: &[Arc<dyn FlushTarget>]) -> SerialNum {
    targets
        .iter()
        .map(|t| t.newest_flushed_serial())
        .max()
        .unwrap_or(0)
}

/// Flush target over a `LoggedStore`. Holds only a weak reference, so it
/// never keeps the subsystem alive.
pub struct StoreFlushTarget<S: StoreState> {
    name: String,
    component: FlushComponent,
    store: Weak<LoggedStore<S>>,
    bounds: Arc<FlushBounds>,
}

impl<S: StoreState> StoreFlushTarget<S> {
    pub fn new(name: impl Into<String>, component: FlushComponent, store: &Arc<LoggedStore<S>>) -> Self {
        Self {
            name: name.into(),
            component,
            store: Arc::downgrade(store),
            bounds: store.bounds(),
        }
    }

    pub fn into_target(self) -> Arc<dyn FlushTarget> {
        Arc::new(self)
    }
}

impl<S: StoreState> FlushTarget for StoreFlushTarget<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_type(&self) -> FlushTargetType {
        FlushTargetType::Flush
    }

    fn component(&self) -> FlushComponent {
        self.component
    }

    fn flushed_serial(&self) -> SerialNum {
        self.bounds.oldest()
    }

    fn newest_flushed_serial(&self) -> SerialNum {
        self.bounds.newest()
    }

    fn approx_memory_gain(&self) -> u64 {
        self.store
            .upgrade()
            .map(|s| s.unflushed_bytes())
            .unwrap_or(0)
    }

    fn last_flush_time(&self) -> Option<SystemTime> {
        self.store.upgrade().and_then(|s| s.last_flush_time())
    }

    fn flush(&self, target_serial: SerialNum) -> Result<FlushStats> {
        let store = self
            .store
            .upgrade()
            .ok_or_else(|| DocDbError::SubsystemGone(self.name.clone()))?;
        let gain = store.unflushed_bytes();
        let flushed_serial = store.flush(target_serial).map_err(|e| match e {
            e @ DocDbError::FlushFailed { .. } => e,
            other => DocDbError::FlushFailed {
                target: self.name.clone(),
                reason: other.to_string(),
            },
        })?;
        Ok(FlushStats {
            target: self.name.clone(),
            flushed_serial,
            bytes_released: gain.saturating_sub(store.unflushed_bytes()),
        })
    }
}

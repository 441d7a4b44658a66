//! Generic log-structured store with exact-prefix flushes.
//!
//! Layout of a store directory:
//! - `changes.log`: every applied operation, tagged with its serial
//! - `snapshot-<serial>.dat`: full state as of `<serial>` (optional)
//! - `checkpoint.dat`: which snapshot is current and the flushed serial
//!
//! Flush protocol:
//! 1. Target at or past the last applied serial: write a new snapshot,
//!    fsync, write the checkpoint, then reset the log.
//! 2. Target behind the last applied serial: fsync the log and write a
//!    checkpoint that only covers records up to the target.
//! 3. Only after the checkpoint is renamed into place are the flushed
//!    bounds advanced.
//!
//! Loading applies the snapshot, then log records up to the checkpoint
//! serial, and cuts every later record off the log. Those records are
//! replayed from the transaction log.

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::record_log::RecordLog;
use super::tagged_file::{read_tagged_file, write_tagged_file};
use crate::error::{DocDbError, Result};
use crate::serial::{SerialNum, SerialTracker};
use crate::util::{FileHeader, HeaderTag};

const LOG_FILE: &str = "changes.log";
const CHECKPOINT_FILE: &str = "checkpoint.dat";

/// In-memory state of a logged store. Operations must be deterministic:
/// applying the same sequence to the same starting state gives the same
/// result.
pub trait StoreState: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Op: Serialize + DeserializeOwned + Clone + Debug + Send + Sync;

    fn apply(&mut self, op: &Self::Op);

    /// Rough heap usage, for stats and flush prioritization.
    fn memory_usage(&self) -> usize {
        0
    }
}

/// Persisted pointer to the current snapshot and flushed serial.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flushed_serial: SerialNum,
    pub snapshot_serial: Option<SerialNum>,
}

/// Flushed-serial bounds of a store. Shared with flush targets so they can
/// still answer after the store itself is gone.
#[derive(Debug, Default)]
pub struct FlushBounds {
    oldest: AtomicU64,
    newest: AtomicU64,
}

impl FlushBounds {
    pub fn new(flushed: SerialNum) -> Self {
        Self {
            oldest: AtomicU64::new(flushed),
            newest: AtomicU64::new(flushed),
        }
    }

    pub fn oldest(&self) -> SerialNum {
        self.oldest.load(Ordering::SeqCst)
    }

    pub fn newest(&self) -> SerialNum {
        self.newest.load(Ordering::SeqCst)
    }

    fn advance(&self, flushed: SerialNum) {
        self.oldest.fetch_max(flushed, Ordering::SeqCst);
        self.newest.fetch_max(flushed, Ordering::SeqCst);
    }
}

pub struct LoggedStore<S: StoreState> {
    name: String,
    dir: PathBuf,
    state: RwLock<S>,
    log: RecordLog,
    tracker: SerialTracker,
    checkpoint: Mutex<Checkpoint>,
    bounds: Arc<FlushBounds>,
    unflushed_bytes: AtomicU64,
    /// Derived records logged at an already flushed serial
    derived_pending: AtomicBool,
    last_flush: Mutex<Option<SystemTime>>,
    flush_lock: Mutex<()>,
    #[cfg(any(test, feature = "testing"))]
    fail_next_flush: std::sync::atomic::AtomicBool,
    #[cfg(any(test, feature = "testing"))]
    fail_next_apply: std::sync::atomic::AtomicBool,
}

impl<S: StoreState> LoggedStore<S> {
    /// Open (or create) the store in `dir`, loading flushed state.
    pub fn open(name: impl Into<String>, dir: PathBuf) -> Result<Self> {
        let name = name.into();
        fs::create_dir_all(&dir)?;

        let checkpoint = match read_tagged_file(&dir.join(CHECKPOINT_FILE))? {
            Some((_, body)) => bincode::deserialize::<Checkpoint>(&body)?,
            None => Checkpoint::default(),
        };

        let mut state = S::default();
        if let Some(snapshot_serial) = checkpoint.snapshot_serial {
            let path = snapshot_path(&dir, snapshot_serial);
            let (_, body) = read_tagged_file(&path)?.ok_or_else(|| {
                DocDbError::InvalidFileHeader {
                    file: path.display().to_string(),
                    reason: "checkpoint refers to a missing snapshot".to_string(),
                }
            })?;
            state = bincode::deserialize(&body)?;
        }

        let log = RecordLog::open(dir.join(LOG_FILE))?;
        let mut replayed = 0usize;
        let mut cut_at = None;
        for record in log.read_all()? {
            if record.serial > checkpoint.flushed_serial {
                cut_at = Some(record.offset);
                break;
            }
            if record.serial < checkpoint.snapshot_serial.unwrap_or(0) {
                continue;
            }
            let op: S::Op = bincode::deserialize(&record.payload)?;
            state.apply(&op);
            replayed += 1;
        }
        if let Some(offset) = cut_at {
            debug!(store = %name, offset, "Dropping unflushed log records");
            log.truncate(offset)?;
        }

        info!(
            store = %name,
            flushed_serial = checkpoint.flushed_serial,
            snapshot_serial = ?checkpoint.snapshot_serial,
            replayed_records = replayed,
            "Opened logged store"
        );

        Ok(Self {
            tracker: SerialTracker::new(name.clone(), checkpoint.flushed_serial),
            bounds: Arc::new(FlushBounds::new(checkpoint.flushed_serial)),
            name,
            dir,
            state: RwLock::new(state),
            log,
            checkpoint: Mutex::new(checkpoint),
            unflushed_bytes: AtomicU64::new(0),
            derived_pending: AtomicBool::new(false),
            last_flush: Mutex::new(None),
            flush_lock: Mutex::new(()),
            #[cfg(any(test, feature = "testing"))]
            fail_next_flush: std::sync::atomic::AtomicBool::new(false),
            #[cfg(any(test, feature = "testing"))]
            fail_next_apply: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn last_applied(&self) -> SerialNum {
        self.tracker.last_applied()
    }

    pub fn flushed_serial(&self) -> SerialNum {
        self.bounds.oldest()
    }

    pub fn bounds(&self) -> Arc<FlushBounds> {
        self.bounds.clone()
    }

    pub fn unflushed_bytes(&self) -> u64 {
        self.unflushed_bytes.load(Ordering::SeqCst)
    }

    pub fn last_flush_time(&self) -> Option<SystemTime> {
        *self.last_flush.lock()
    }

    pub fn memory_usage(&self) -> usize {
        self.state.read().memory_usage()
    }

    /// Apply `op` at `serial`. Serials at or below the last applied one are
    /// already contained in this store (replay overlap) and are skipped;
    /// returns whether the op was applied.
    pub fn apply(&self, serial: SerialNum, op: &S::Op) -> Result<bool> {
        #[cfg(any(test, feature = "testing"))]
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(DocDbError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected apply failure in {}", self.name),
            )));
        }

        let mut state = self.state.write();
        if serial <= self.tracker.last_applied() {
            return Ok(false);
        }
        let payload = bincode::serialize(op)?;
        self.log.append(serial, &payload)?;
        self.tracker.advance(serial)?;
        state.apply(op);
        self.unflushed_bytes
            .fetch_add(payload.len() as u64, Ordering::SeqCst);
        Ok(true)
    }

    /// Apply a derived operation (reprocessing output) at the current serial
    /// without advancing it.
    pub fn apply_derived(&self, op: &S::Op) -> Result<()> {
        let mut state = self.state.write();
        let payload = bincode::serialize(op)?;
        self.log.append(self.tracker.last_applied(), &payload)?;
        state.apply(op);
        self.unflushed_bytes
            .fetch_add(payload.len() as u64, Ordering::SeqCst);
        self.derived_pending.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Move the applied serial forward without an operation, e.g. when a
    /// sub-database commits a config change this store takes no part in.
    pub fn raise_serial(&self, serial: SerialNum) {
        let _state = self.state.write();
        self.tracker.raise_to(serial);
    }

    /// Run `f` against the current state under a read lock.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.read())
    }

    /// Persist everything up to `min(target, last applied)`. Returns the
    /// serial this store is now flushed to.
    pub fn flush(&self, target: SerialNum) -> Result<SerialNum> {
        let _guard = self.flush_lock.lock();

        #[cfg(any(test, feature = "testing"))]
        if self.fail_next_flush.swap(false, Ordering::SeqCst) {
            return Err(DocDbError::FlushFailed {
                target: self.name.clone(),
                reason: "injected failure".to_string(),
            });
        }

        let current = *self.checkpoint.lock();
        let last_applied = self.tracker.last_applied();
        let flush_to = target.min(last_applied);
        let full = flush_to == last_applied;
        if flush_to < current.flushed_serial
            || (flush_to == current.flushed_serial
                && !(full && self.derived_pending.load(Ordering::SeqCst)))
        {
            return Ok(current.flushed_serial);
        }

        let next = if full && self.unflushed_bytes() > 0 {
            self.write_snapshot(current)?
        } else {
            self.log.sync()?;
            let next = Checkpoint {
                flushed_serial: flush_to,
                snapshot_serial: current.snapshot_serial,
            };
            self.write_checkpoint(&next)?;
            next
        };

        *self.checkpoint.lock() = next;
        self.bounds.advance(next.flushed_serial);
        *self.last_flush.lock() = Some(SystemTime::now());
        debug!(
            store = %self.name,
            flushed_serial = next.flushed_serial,
            snapshot_serial = ?next.snapshot_serial,
            "Flushed logged store"
        );
        Ok(next.flushed_serial)
    }

    fn write_snapshot(&self, current: Checkpoint) -> Result<Checkpoint> {
        // Read lock keeps appends out between capture and log reset
        let state = self.state.read();
        let serial = self.tracker.last_applied();
        let body = bincode::serialize(&*state)?;
        let header = FileHeader::new()
            .with_tag("store", HeaderTag::Text(self.name.clone()))
            .with_tag("serial", HeaderTag::Integer(serial as i64));
        write_tagged_file(&snapshot_path(&self.dir, serial), header, &body)?;

        let next = Checkpoint {
            flushed_serial: serial,
            snapshot_serial: Some(serial),
        };
        self.write_checkpoint(&next)?;
        self.log.reset()?;
        self.unflushed_bytes.store(0, Ordering::SeqCst);
        self.derived_pending.store(false, Ordering::SeqCst);
        drop(state);

        if let Some(old) = current.snapshot_serial.filter(|old| *old != serial) {
            let _ = fs::remove_file(snapshot_path(&self.dir, old));
        }
        Ok(next)
    }

    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let body = bincode::serialize(checkpoint)?;
        write_tagged_file(
            &self.dir.join(CHECKPOINT_FILE),
            FileHeader::new().with_tag("store", HeaderTag::Text(self.name.clone())),
            &body,
        )
    }

    /// Remove the store's files. The in-memory state stays readable until
    /// the store is dropped.
    pub fn destroy(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        info!(store = %self.name, "Removed logged store files");
        Ok(())
    }

    /// Make the next flush fail without touching any file.
    #[cfg(any(test, feature = "testing"))]
    pub fn fail_next_flush(&self) {
        self.fail_next_flush.store(true, Ordering::SeqCst);
    }

    /// Make the next apply fail before anything is logged or changed.
    #[cfg(any(test, feature = "testing"))]
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }
}

fn snapshot_path(dir: &Path, serial: SerialNum) -> PathBuf {
    dir.join(format!("snapshot-{}.dat", serial))
}

//! Transaction log: ordered, serial-tagged feed records used for replay.
//!
//! Records live in `transactions.log` (record log framing, bincode
//! payloads). Pruning rewrites the log without the pruned prefix and
//! remembers the prune point in `pruned.dat`, so the last serial is known
//! even when every record has been pruned.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DocDbError, Result};
use crate::models::FeedRecord;
use crate::persistence::{read_tagged_file, write_tagged_file, RecordLog};
use crate::serial::SerialNum;
use crate::util::{FileHeader, HeaderTag};

const LOG_FILE: &str = "transactions.log";
const PRUNED_FILE: &str = "pruned.dat";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
struct PruneMarker {
    pruned_serial: SerialNum,
}

#[derive(Debug, Default, Clone, Copy)]
struct Range {
    first: Option<SerialNum>,
    last: SerialNum,
    pruned: SerialNum,
    records: usize,
}

/// Statistics about the transaction log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlogStats {
    pub first_serial: Option<SerialNum>,
    pub last_serial: SerialNum,
    pub pruned_serial: SerialNum,
    pub records: usize,
    pub bytes: u64,
}

pub struct TransactionLog {
    dir: PathBuf,
    log: RwLock<RecordLog>,
    range: RwLock<Range>,
}

impl TransactionLog {
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let pruned = match read_tagged_file(&dir.join(PRUNED_FILE))? {
            Some((_, body)) => bincode::deserialize::<PruneMarker>(&body)?.pruned_serial,
            None => 0,
        };

        let log = RecordLog::open(dir.join(LOG_FILE))?;
        let mut range = Range {
            pruned,
            last: pruned,
            ..Range::default()
        };
        for record in log.read_all()? {
            if record.serial <= pruned {
                continue;
            }
            range.first.get_or_insert(record.serial);
            range.last = record.serial;
            range.records += 1;
        }

        info!(
            dir = %dir.display(),
            first_serial = ?range.first,
            last_serial = range.last,
            pruned_serial = pruned,
            "Opened transaction log"
        );
        Ok(Self {
            dir,
            log: RwLock::new(log),
            range: RwLock::new(range),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a record. Its serial must be above every logged serial.
    pub fn append(&self, record: &FeedRecord) -> Result<()> {
        let mut range = self.range.write();
        if record.serial <= range.last {
            return Err(DocDbError::SerialOutOfOrder {
                component: "tlog".to_string(),
                got: record.serial,
                last: range.last,
            });
        }
        let payload = bincode::serialize(record)?;
        self.log.read().append(record.serial, &payload)?;
        range.first.get_or_insert(record.serial);
        range.last = record.serial;
        range.records += 1;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.log.read().sync()
    }

    /// Every record with a serial above `serial`, in order. Fails when
    /// records after `serial` have already been pruned.
    pub fn replay_from(&self, serial: SerialNum) -> Result<Vec<FeedRecord>> {
        let pruned = self.range.read().pruned;
        if serial < pruned {
            return Err(DocDbError::LogHeadLost {
                needed_from: serial,
                pruned,
            });
        }
        let log = self.log.read();
        let mut records = Vec::new();
        for raw in log.read_all()? {
            if raw.serial <= serial {
                continue;
            }
            records.push(bincode::deserialize::<FeedRecord>(&raw.payload)?);
        }
        Ok(records)
    }

    pub fn last_serial(&self) -> SerialNum {
        self.range.read().last
    }

    pub fn first_serial(&self) -> Option<SerialNum> {
        self.range.read().first
    }

    pub fn pruned_serial(&self) -> SerialNum {
        self.range.read().pruned
    }

    /// Drop every record up to and including `up_to` (clamped to the last
    /// serial). Returns the number of records removed.
    pub fn prune(&self, up_to: SerialNum) -> Result<usize> {
        let mut range = self.range.write();
        let up_to = up_to.min(range.last);
        if up_to <= range.pruned {
            return Ok(0);
        }

        let marker = PruneMarker { pruned_serial: up_to };
        write_tagged_file(
            &self.dir.join(PRUNED_FILE),
            FileHeader::new().with_tag("pruned", HeaderTag::Integer(up_to as i64)),
            &bincode::serialize(&marker)?,
        )?;

        let mut log = self.log.write();
        let records = log.read_all()?;
        let tmp_path = self.dir.join(format!("{}.tmp", LOG_FILE));
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }
        let rewritten = RecordLog::open(tmp_path.clone())?;
        let mut kept = 0usize;
        let mut first = None;
        for record in &records {
            if record.serial > up_to {
                rewritten.append(record.serial, &record.payload)?;
                first.get_or_insert(record.serial);
                kept += 1;
            }
        }
        rewritten.sync()?;
        drop(rewritten);

        let path = self.dir.join(LOG_FILE);
        fs::rename(&tmp_path, &path)?;
        *log = RecordLog::open(path)?;

        let removed = range.records.saturating_sub(kept);
        range.pruned = up_to;
        range.first = first;
        range.records = kept;
        debug!(pruned_serial = up_to, removed, kept, "Pruned transaction log");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<TlogStats> {
        let range = *self.range.read();
        Ok(TlogStats {
            first_serial: range.first,
            last_serial: range.last,
            pruned_serial: range.pruned,
            records: range.records,
            bytes: self.log.read().len()?,
        })
    }
}

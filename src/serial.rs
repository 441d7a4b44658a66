//! Serial numbers: the logical clock ordering every mutation and flush.
//!
//! `SerialClock` hands out serials for new feed operations. `SerialTracker`
//! sits in every sub-database and component and rejects anything that would
//! move it backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DocDbError, Result};

/// Logical write timestamp. 0 means "never written".
pub type SerialNum = u64;

/// Allocates strictly increasing serials for one document database.
#[derive(Debug, Default)]
pub struct SerialClock {
    last: AtomicU64,
}

impl SerialClock {
    pub fn new(last: SerialNum) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Allocate the next serial
    pub fn next(&self) -> SerialNum {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last(&self) -> SerialNum {
        self.last.load(Ordering::SeqCst)
    }

    /// Move the clock forward to at least `serial` (used while replaying).
    pub fn observe(&self, serial: SerialNum) {
        self.last.fetch_max(serial, Ordering::SeqCst);
    }
}

/// Last-applied serial bookkeeping for one component.
#[derive(Debug)]
pub struct SerialTracker {
    component: String,
    last_applied: AtomicU64,
}

impl SerialTracker {
    pub fn new(component: impl Into<String>, last_applied: SerialNum) -> Self {
        Self {
            component: component.into(),
            last_applied: AtomicU64::new(last_applied),
        }
    }

    pub fn last_applied(&self) -> SerialNum {
        self.last_applied.load(Ordering::SeqCst)
    }

    /// Record `serial` as applied. It must be strictly greater than the
    /// previous one; anything else is a protocol violation.
    pub fn advance(&self, serial: SerialNum) -> Result<()> {
        let last = self.last_applied.load(Ordering::SeqCst);
        if serial <= last {
            return Err(DocDbError::SerialOutOfOrder {
                component: self.component.clone(),
                got: serial,
                last,
            });
        }
        match self
            .last_applied
            .compare_exchange(last, serial, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(current) => Err(DocDbError::SerialOutOfOrder {
                component: self.component.clone(),
                got: serial,
                last: current,
            }),
        }
    }

    /// Raise the tracker to `serial` without the strictness check. Used when
    /// a config change or history wipe is committed at a serial that is
    /// shared with the rest of the document database.
    pub fn raise_to(&self, serial: SerialNum) {
        self.last_applied.fetch_max(serial, Ordering::SeqCst);
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

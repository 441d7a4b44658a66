//! Feed path: the handler that logs and dispatches operations, and the
//! per sub-database feed views that apply them.

mod handler;
mod view;

pub use handler::FeedHandler;
pub use view::{FeedView, FeedViewContext, StoreFeedView};

use crate::serial::SerialNum;

/// Result of feeding one operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Logged and applied at this serial
    Accepted(SerialNum),
    /// Not logged; feed is blocked by policy
    Rejected { reason: String },
}

impl FeedOutcome {
    pub fn serial(&self) -> Option<SerialNum> {
        match self {
            FeedOutcome::Accepted(serial) => Some(*serial),
            FeedOutcome::Rejected { .. } => None,
        }
    }
}

/// Result of a transaction log prune request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PruneOutcome {
    Pruned { serial: SerialNum, records: usize },
    /// Nothing new to prune; carries the current prune serial
    Unchanged(SerialNum),
    /// The owner disallows pruning
    Denied,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub from_serial: SerialNum,
    pub records: usize,
    pub last_serial: SerialNum,
}

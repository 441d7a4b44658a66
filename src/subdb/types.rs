use std::fmt;

pub const READY_SUB_DB_ID: u32 = 0;
pub const REMOVED_SUB_DB_ID: u32 = 1;
pub const NOTREADY_SUB_DB_ID: u32 = 2;

/// Partition kind. Decides which subsystems a sub-database carries and
/// whether its documents are visible to search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubDbType {
    /// Searchable documents: meta store, summary, attributes and index
    Ready,
    /// Tombstones of removed documents: meta store only
    Removed,
    /// Stored but not searchable documents: meta store and summary
    NotReady,
}

impl SubDbType {
    pub fn all() -> [SubDbType; 3] {
        [SubDbType::Ready, SubDbType::Removed, SubDbType::NotReady]
    }

    pub fn id(&self) -> u32 {
        match self {
            SubDbType::Ready => READY_SUB_DB_ID,
            SubDbType::Removed => REMOVED_SUB_DB_ID,
            SubDbType::NotReady => NOTREADY_SUB_DB_ID,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            READY_SUB_DB_ID => Some(SubDbType::Ready),
            REMOVED_SUB_DB_ID => Some(SubDbType::Removed),
            NOTREADY_SUB_DB_ID => Some(SubDbType::NotReady),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SubDbType::Ready => "ready",
            SubDbType::Removed => "removed",
            SubDbType::NotReady => "notready",
        }
    }

    /// Directory name below the document database directory
    pub fn dir_name(&self) -> String {
        format!("{}.{}", self.id(), self.name())
    }

    pub fn has_summary(&self) -> bool {
        !matches!(self, SubDbType::Removed)
    }

    pub fn has_attributes(&self) -> bool {
        matches!(self, SubDbType::Ready)
    }

    pub fn has_index(&self) -> bool {
        matches!(self, SubDbType::Ready)
    }

    pub fn active_docs(&self) -> bool {
        matches!(self, SubDbType::Ready)
    }
}

impl fmt::Display for SubDbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a sub-database
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubDbState {
    Created,
    Planned,
    Initialized,
    ViewsActive,
    Serving,
    Closing,
    Closed,
}

impl SubDbState {
    pub fn accepts_config(&self) -> bool {
        matches!(self, SubDbState::ViewsActive | SubDbState::Serving)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SubDbState::Closing | SubDbState::Closed)
    }
}

impl fmt::Display for SubDbState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a history wipe request. Refusals are outcomes, not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WipeOutcome {
    Applied { wiped: Vec<String> },
    /// The owner disallows destructive cleanup
    Denied,
    /// Reprocessing registered at or before the wipe serial is outstanding
    BlockedByReprocessing,
}

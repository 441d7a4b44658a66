use thiserror::Error;

use crate::serial::SerialNum;

/// Main error type for document database operations
#[derive(Error, Debug)]
pub enum DocDbError {
    #[error("Protocol violation in {component}: {message}")]
    ProtocolViolation {
        component: String,
        message: String,
    },

    #[error("Out of order serial in {component}: got {got}, last applied {last}")]
    SerialOutOfOrder {
        component: String,
        got: SerialNum,
        last: SerialNum,
    },

    #[error("Transaction log tail lost: newest flushed serial {newest_flushed} exceeds last logged serial {last_logged}")]
    LogTailLost {
        newest_flushed: SerialNum,
        last_logged: SerialNum,
    },

    #[error("Transaction log head lost: replay must start after serial {needed_from} but the log is pruned to {pruned}")]
    LogHeadLost {
        needed_from: SerialNum,
        pruned: SerialNum,
    },

    #[error("Flush of {target} failed: {reason}")]
    FlushFailed { target: String, reason: String },

    #[error("Flush target {0} no longer has a live subsystem")]
    SubsystemGone(String),

    #[error("Invalid file header for {file}: {reason}")]
    InvalidFileHeader { file: String, reason: String },

    #[error("Corrupt record in {file} at offset {offset}: {reason}")]
    CorruptRecord {
        file: String,
        offset: u64,
        reason: String,
    },

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Reprocessing task {task} failed: {reason}")]
    ReprocessingFailed { task: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for document database operations
pub type Result<T> = std::result::Result<T, DocDbError>;

impl DocDbError {
    pub fn protocol(component: impl Into<String>, message: impl Into<String>) -> Self {
        DocDbError::ProtocolViolation {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Errors after which ordering invariants cannot be reconstructed.
    /// The owning sub-database must be aborted, not repaired.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DocDbError::ProtocolViolation { .. }
                | DocDbError::SerialOutOfOrder { .. }
                | DocDbError::LogTailLost { .. }
                | DocDbError::LogHeadLost { .. }
        )
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DocDbError::Io(_) | DocDbError::FlushFailed { .. } | DocDbError::Serialization(_)
        )
    }
}

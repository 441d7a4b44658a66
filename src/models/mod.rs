pub mod document;
pub mod operation;

pub use document::{current_timestamp, Document, DocumentId, FieldValue};
pub use operation::{DbDocumentId, DocumentUpdate, FeedOperation, FeedRecord};

//! Attribute storage: per-field columnar values derived from documents.

mod manager;
mod vector;

pub use manager::{AttributeManager, LoggedAttributeManager};
pub use vector::{AttributeOp, AttributeState, AttributeVector};

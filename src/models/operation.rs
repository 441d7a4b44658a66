use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::document::{Document, DocumentId, FieldValue};
use crate::serial::SerialNum;

/// Operations written to the transaction log and applied through feed views
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FeedOperation {
    // Document operations
    Put(Document),
    Update {
        id: DocumentId,
        update: DocumentUpdate,
    },
    Remove(DocumentId),
    /// Move a document between sub-databases (e.g. ready -> not ready).
    /// Carries the document so replay does not depend on the source store.
    Move {
        doc: Document,
        from_sub_db: u32,
        to_sub_db: u32,
    },

    // Administrative
    /// Drop retained history data for fields no longer in the schema
    WipeHistory,
    /// Serial placeholder, e.g. for a committed config change
    NoOp,
}

/// Partial document update: field assignments and field clears
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub assign: BTreeMap<String, FieldValue>,
    pub clear: Vec<String>,
}

impl DocumentUpdate {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a field value
    pub fn assign(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.assign.insert(field.into(), value.into());
        self
    }

    /// Remove a field
    pub fn clear(mut self, field: impl Into<String>) -> Self {
        self.clear.push(field.into());
        self
    }

    /// Check if this update is empty
    pub fn is_empty(&self) -> bool {
        self.assign.is_empty() && self.clear.is_empty()
    }

    /// Fields touched by this update
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.assign
            .keys()
            .map(|s| s.as_str())
            .chain(self.clear.iter().map(|s| s.as_str()))
    }

    /// Apply this update to a document
    pub fn apply_to(&self, doc: &mut Document) {
        for field in &self.clear {
            doc.fields.remove(field);
        }
        for (field, value) in &self.assign {
            doc.fields.insert(field.clone(), value.clone());
        }
    }
}

impl FeedOperation {
    /// Get a human-readable name for this operation (for logging)
    pub fn name(&self) -> &'static str {
        match self {
            FeedOperation::Put(_) => "Put",
            FeedOperation::Update { .. } => "Update",
            FeedOperation::Remove(_) => "Remove",
            FeedOperation::Move { .. } => "Move",
            FeedOperation::WipeHistory => "WipeHistory",
            FeedOperation::NoOp => "NoOp",
        }
    }

    /// Document this operation targets, if any
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            FeedOperation::Put(doc) => Some(&doc.id),
            FeedOperation::Move { doc, .. } => Some(&doc.id),
            FeedOperation::Update { id, .. } | FeedOperation::Remove(id) => Some(id),
            FeedOperation::WipeHistory | FeedOperation::NoOp => None,
        }
    }

    /// Check if this operation modifies documents
    pub fn is_document_modification(&self) -> bool {
        self.document_id().is_some()
    }
}

/// Where a document lives: sub-database id and local id within it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbDocumentId {
    pub sub_db_id: u32,
    pub lid: u32,
}

impl DbDocumentId {
    pub fn new(sub_db_id: u32, lid: u32) -> Self {
        Self { sub_db_id, lid }
    }
}

/// A serial-tagged operation as stored in the transaction log.
///
/// Placement is decided when the operation is fed and logged with it, so
/// replay assigns exactly the same local ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub serial: SerialNum,
    pub op: FeedOperation,
    /// Where the operation writes the document
    pub target: Option<DbDocumentId>,
    /// Where the document lived before, when it has to be removed there
    pub previous: Option<DbDocumentId>,
}

impl FeedRecord {
    pub fn new(serial: SerialNum, op: FeedOperation) -> Self {
        Self {
            serial,
            op,
            target: None,
            previous: None,
        }
    }

    pub fn with_target(mut self, target: DbDocumentId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_previous(mut self, previous: Option<DbDocumentId>) -> Self {
        self.previous = previous;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_update_apply() {
        let mut doc = Document::new("id:a")
            .with_field("title", "old")
            .with_field("stale", 1i64);
        let update = DocumentUpdate::new().assign("title", "new").clear("stale");
        assert!(!update.is_empty());
        assert_eq!(update.fields().collect::<Vec<_>>(), vec!["title", "stale"]);

        update.apply_to(&mut doc);
        assert_eq!(doc.get("title"), Some(&FieldValue::Text("new".into())));
        assert!(doc.get("stale").is_none());
    }

    #[test]
    fn test_record_placement() {
        let record = FeedRecord::new(7, FeedOperation::Remove("id:a".into()))
            .with_target(DbDocumentId::new(1, 3))
            .with_previous(Some(DbDocumentId::new(0, 3)));
        assert_eq!(record.target.map(|t| t.sub_db_id), Some(1));
        assert_eq!(record.previous, Some(DbDocumentId::new(0, 3)));
        assert!(FeedRecord::new(8, FeedOperation::NoOp).target.is_none());
    }

    #[test]
    fn test_operation_name() {
        assert_eq!(FeedOperation::NoOp.name(), "NoOp");
        assert_eq!(FeedOperation::Remove("id:a".into()).name(), "Remove");
    }

    #[test]
    fn test_operation_is_document_modification() {
        assert!(FeedOperation::Put(Document::new("id:a")).is_document_modification());
        assert!(!FeedOperation::WipeHistory.is_document_modification());
        assert!(!FeedOperation::NoOp.is_document_modification());
    }
}

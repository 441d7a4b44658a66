//! Document retrieval for a sub-database: full documents and their metadata,
//! used by document get operations and visitors.

use std::sync::Arc;

use crate::metastore::{DocumentMetaStoreContext, Lid, MetaEntry};
use crate::models::{Document, DocumentId};
use crate::summary::SummaryManager;

pub trait DocumentRetriever: Send + Sync {
    fn doc_type(&self) -> &str;

    fn get_document(&self, id: &DocumentId) -> Option<Document>;

    fn get_document_meta(&self, id: &DocumentId) -> Option<MetaEntry>;

    /// Call `visitor` for every stored document in lid order. Metadata-only
    /// sub-databases visit entries without a document.
    fn visit(&self, visitor: &mut dyn FnMut(Lid, &MetaEntry, Option<&Document>));
}

pub struct StoreDocumentRetriever {
    doc_type: String,
    meta: DocumentMetaStoreContext,
    summary: Option<Arc<dyn SummaryManager>>,
}

impl StoreDocumentRetriever {
    pub fn new(
        doc_type: impl Into<String>,
        meta: DocumentMetaStoreContext,
        summary: Option<Arc<dyn SummaryManager>>,
    ) -> Self {
        Self {
            doc_type: doc_type.into(),
            meta,
            summary,
        }
    }
}

impl DocumentRetriever for StoreDocumentRetriever {
    fn doc_type(&self) -> &str {
        &self.doc_type
    }

    fn get_document(&self, id: &DocumentId) -> Option<Document> {
        let lid = self.meta.get_lid(id)?;
        let doc = self.summary.as_ref()?.get(lid)?;
        // The lid may have been reused between the two lookups
        (doc.id == *id).then(|| (*doc).clone())
    }

    fn get_document_meta(&self, id: &DocumentId) -> Option<MetaEntry> {
        let lid = self.meta.get_lid(id)?;
        self.meta.get_entry(lid)
    }

    fn visit(&self, visitor: &mut dyn FnMut(Lid, &MetaEntry, Option<&Document>)) {
        for lid in self.meta.lids() {
            let Some(entry) = self.meta.get_entry(lid) else {
                continue;
            };
            let doc = self.summary.as_ref().and_then(|s| s.get(lid));
            visitor(lid, &entry, doc.as_deref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryConfig;
    use crate::summary::LoggedSummaryManager;
    use tempfile::TempDir;

    #[test]
    fn test_get_and_visit() {
        let tmp = TempDir::new().unwrap();
        let meta = DocumentMetaStoreContext::open("ready", tmp.path().join("meta")).unwrap();
        let summary: Arc<dyn SummaryManager> = Arc::new(
            LoggedSummaryManager::open(
                "ready",
                tmp.path().join("summary"),
                &SummaryConfig::default(),
                Default::default(),
            )
            .unwrap(),
        );
        let doc = Document::new("id:a").with_field("title", "x");
        meta.put(1, 1, &doc.id, doc.timestamp, 4, true).unwrap();
        summary.put(1, 1, &doc).unwrap();

        let retriever = StoreDocumentRetriever::new("music", meta.clone(), Some(summary));
        assert_eq!(retriever.doc_type(), "music");
        assert_eq!(retriever.get_document(&doc.id), Some(doc.clone()));
        assert_eq!(retriever.get_document_meta(&doc.id).unwrap().serial, 1);
        assert!(retriever.get_document(&DocumentId::new("id:b")).is_none());

        let mut seen = Vec::new();
        retriever.visit(&mut |lid, entry, d| seen.push((lid, entry.doc_id.clone(), d.is_some())));
        assert_eq!(seen, vec![(1, doc.id.clone(), true)]);

        let tombstones = StoreDocumentRetriever::new("music", meta, None);
        assert!(tombstones.get_document(&doc.id).is_none());
        assert!(tombstones.get_document_meta(&doc.id).is_some());
    }
}

use std::sync::Arc;

use tracing::debug;

use super::session::{SessionId, SessionManager};
use super::stats::MatchingStatsRegistry;
use crate::attribute::AttributeManager;
use crate::error::{DocDbError, Result};
use crate::index::IndexManager;
use crate::metastore::DocumentMetaStoreContext;
use crate::models::{Document, DocumentId, FieldValue};
use crate::reconfig::ConfigSnapshot;
use crate::summary::SummaryManager;

/// Read path of one sub-database, bound to the config snapshot it was
/// created for. A config change builds a new view; searches already holding
/// the old one finish against it.
pub struct SearchView {
    sub_db_id: u32,
    snapshot: Arc<ConfigSnapshot>,
    meta: DocumentMetaStoreContext,
    attributes: Option<Arc<dyn AttributeManager>>,
    index: Option<Arc<dyn IndexManager>>,
    summary: Option<Arc<dyn SummaryManager>>,
    sessions: Arc<SessionManager>,
    matching: Arc<MatchingStatsRegistry>,
}

/// Subsystems a search view reads from
#[derive(Clone)]
pub struct SearchViewParts {
    pub meta: DocumentMetaStoreContext,
    pub attributes: Option<Arc<dyn AttributeManager>>,
    pub index: Option<Arc<dyn IndexManager>>,
    pub summary: Option<Arc<dyn SummaryManager>>,
}

impl SearchView {
    pub fn new(
        sub_db_id: u32,
        snapshot: Arc<ConfigSnapshot>,
        parts: SearchViewParts,
        sessions: Arc<SessionManager>,
        matching: Arc<MatchingStatsRegistry>,
    ) -> Self {
        Self {
            sub_db_id,
            snapshot,
            meta: parts.meta,
            attributes: parts.attributes,
            index: parts.index,
            summary: parts.summary,
            sessions,
            matching,
        }
    }

    pub fn sub_db_id(&self) -> u32 {
        self.sub_db_id
    }

    pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    fn check_rank_profile(&self, rank_profile: &str) -> Result<()> {
        if self.snapshot.rank_profiles.contains(rank_profile) {
            Ok(())
        } else {
            Err(DocDbError::InvalidConfig(format!(
                "unknown rank profile '{}' in config generation {}",
                rank_profile, self.snapshot.generation
            )))
        }
    }

    /// Active documents whose indexed `field` contains `term`
    pub fn match_term(&self, rank_profile: &str, field: &str, term: &str) -> Result<Vec<DocumentId>> {
        self.check_rank_profile(rank_profile)?;
        let Some(index) = &self.index else {
            return Ok(Vec::new());
        };
        let hits: Vec<DocumentId> = index
            .lookup(field, term)
            .iter()
            .filter(|lid| self.meta.is_active(*lid))
            .filter_map(|lid| self.meta.get_entry(lid).map(|e| e.doc_id))
            .collect();
        self.matching.record(rank_profile, hits.len() as u64);
        debug!(sub_db_id = self.sub_db_id, field, term, hits = hits.len(), "Matched term");
        Ok(hits)
    }

    /// Active documents whose attribute `name` equals `value`
    pub fn match_attribute(
        &self,
        rank_profile: &str,
        name: &str,
        value: &FieldValue,
    ) -> Result<Vec<DocumentId>> {
        self.check_rank_profile(rank_profile)?;
        let Some(vector) = self.attributes.as_ref().and_then(|a| a.get_attribute(name)) else {
            return Ok(Vec::new());
        };
        let hits: Vec<DocumentId> = self
            .meta
            .lids()
            .into_iter()
            .filter(|lid| self.meta.is_active(*lid))
            .filter(|lid| vector.get(*lid).as_ref() == Some(value))
            .filter_map(|lid| self.meta.get_entry(lid).map(|e| e.doc_id))
            .collect();
        self.matching.record(rank_profile, hits.len() as u64);
        Ok(hits)
    }

    /// Attribute value of a searchable attribute for `id`
    pub fn attribute(&self, name: &str, id: &DocumentId) -> Option<FieldValue> {
        let lid = self.meta.get_lid(id)?;
        self.attributes.as_ref()?.get_value(name, lid)
    }

    /// Summary of `id` restricted to the configured summary fields
    pub fn summary(&self, id: &DocumentId) -> Option<Document> {
        let lid = self.meta.get_lid(id)?;
        self.summary.as_ref()?.get_summary(lid)
    }

    pub fn open_session(&self, rank_profile: &str) -> Result<SessionId> {
        self.check_rank_profile(rank_profile)?;
        Ok(self.sessions.create(rank_profile))
    }

    /// Run a term match using the rank profile bound to `session`
    pub fn match_in_session(&self, session: SessionId, field: &str, term: &str) -> Result<Vec<DocumentId>> {
        let session = self.sessions.get(session).ok_or_else(|| {
            DocDbError::InvalidConfig(format!("no search session {}", session))
        })?;
        self.match_term(&session.rank_profile, field, term)
    }
}

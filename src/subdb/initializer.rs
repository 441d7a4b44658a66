use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use super::types::SubDbType;
use crate::attribute::{AttributeManager, LoggedAttributeManager};
use crate::config::{IndexConfig, SummaryConfig};
use crate::error::{DocDbError, Result};
use crate::index::{IndexManager, IndexManagerFactory, IndexManagerParams};
use crate::metastore::DocumentMetaStoreContext;
use crate::schema::{AttributeSpec, Schema};
use crate::serial::SerialNum;
use crate::summary::{LoggedSummaryManager, SummaryManager};

/// Load plan for one sub-database. Built without touching disk; `run`
/// does all the I/O and may run on any thread, in parallel with the
/// initializers of the other sub-databases.
///
/// Attributes follow the active schema; the index covers the union of the
/// active and history schemas so history fields stay searchable on disk
/// until wiped.
pub struct SubDbInitializer {
    sub_db_type: SubDbType,
    name: String,
    dir: PathBuf,
    config_serial: SerialNum,
    attribute_specs: BTreeMap<String, AttributeSpec>,
    index_schema: Schema,
    summary_fields: BTreeSet<String>,
    summary_config: SummaryConfig,
    index_config: IndexConfig,
    index_factory: Option<Arc<dyn IndexManagerFactory>>,
}

/// Loaded subsystems, handed to `DocumentSubDb::setup` by value
pub struct SubDbInitializerResult {
    pub(crate) sub_db_type: SubDbType,
    pub(crate) config_serial: SerialNum,
    pub(crate) meta: DocumentMetaStoreContext,
    pub(crate) summary: Option<Arc<dyn SummaryManager>>,
    pub(crate) attributes: Option<Arc<dyn AttributeManager>>,
    pub(crate) index: Option<Arc<dyn IndexManager>>,
}

impl SubDbInitializerResult {
    pub fn sub_db_type(&self) -> SubDbType {
        self.sub_db_type
    }

    pub fn config_serial(&self) -> SerialNum {
        self.config_serial
    }
}

impl SubDbInitializer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sub_db_type: SubDbType,
        name: String,
        dir: PathBuf,
        config_serial: SerialNum,
        schema: &Schema,
        union_schema: &Schema,
        summary_fields: BTreeSet<String>,
        summary_config: SummaryConfig,
        index_config: IndexConfig,
        index_factory: Option<Arc<dyn IndexManagerFactory>>,
    ) -> Self {
        Self {
            sub_db_type,
            name,
            dir,
            config_serial,
            attribute_specs: schema.attribute_specs(),
            index_schema: union_schema.index_schema(),
            summary_fields,
            summary_config,
            index_config,
            index_factory,
        }
    }

    pub fn sub_db_type(&self) -> SubDbType {
        self.sub_db_type
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn config_serial(&self) -> SerialNum {
        self.config_serial
    }

    pub fn attribute_specs(&self) -> &BTreeMap<String, AttributeSpec> {
        &self.attribute_specs
    }

    pub fn run(self) -> Result<SubDbInitializerResult> {
        let started = Instant::now();
        let ty = self.sub_db_type;

        let meta = DocumentMetaStoreContext::open(&self.name, self.dir.join("documentmetastore"))?;

        let summary = if ty.has_summary() {
            let manager = LoggedSummaryManager::open(
                &self.name,
                self.dir.join("summary"),
                &self.summary_config,
                self.summary_fields,
            )?;
            Some(Arc::new(manager) as Arc<dyn SummaryManager>)
        } else {
            None
        };

        let attributes = if ty.has_attributes() {
            let manager = LoggedAttributeManager::open(
                &self.name,
                self.dir.join("attribute"),
                &self.attribute_specs,
                self.config_serial,
            )?;
            Some(Arc::new(manager) as Arc<dyn AttributeManager>)
        } else {
            None
        };

        let index = if ty.has_index() {
            let factory = self.index_factory.ok_or_else(|| {
                DocDbError::InvalidConfig(format!("no index manager factory for {}", self.name))
            })?;
            Some(factory.create(IndexManagerParams {
                sub_db_name: self.name.clone(),
                dir: self.dir.join("index"),
                schema: self.index_schema,
                config: self.index_config,
            })?)
        } else {
            None
        };

        info!(
            sub_db = %self.name,
            docs = meta.num_docs(),
            last_serial = meta.last_applied(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sub-database initialized"
        );
        Ok(SubDbInitializerResult {
            sub_db_type: ty,
            config_serial: self.config_serial,
            meta,
            summary,
            attributes,
            index,
        })
    }
}

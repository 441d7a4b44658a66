use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DocDbError, Result};
use crate::flush::{FlushComponent, FlushTarget, StoreFlushTarget};
use crate::metastore::Lid;
use crate::models::{Document, FieldValue};
use crate::persistence::{LoggedStore, StoreState};
use crate::schema::AttributeSpec;
use crate::serial::SerialNum;

/// Columnar values of one attribute, keyed by lid
#[derive(Default, Serialize, Deserialize)]
pub struct AttributeState {
    spec: Option<AttributeSpec>,
    created_serial: SerialNum,
    values: BTreeMap<Lid, FieldValue>,
    /// Every document present at creation has been derived
    populated: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AttributeOp {
    Init {
        spec: AttributeSpec,
        created_serial: SerialNum,
        populated: bool,
    },
    Set {
        lid: Lid,
        value: FieldValue,
    },
    Clear {
        lid: Lid,
    },
    MarkPopulated,
}

impl StoreState for AttributeState {
    type Op = AttributeOp;

    fn apply(&mut self, op: &AttributeOp) {
        match op {
            AttributeOp::Init {
                spec,
                created_serial,
                populated,
            } => {
                self.spec = Some(spec.clone());
                self.created_serial = *created_serial;
                self.populated = *populated;
                self.values.clear();
            }
            AttributeOp::Set { lid, value } => {
                self.values.insert(*lid, value.clone());
            }
            AttributeOp::Clear { lid } => {
                self.values.remove(lid);
            }
            AttributeOp::MarkPopulated => self.populated = true,
        }
    }

    fn memory_usage(&self) -> usize {
        self.values.values().map(|v| v.size_bytes() + 4).sum()
    }
}

/// One attribute vector. Lives in `<name>-<created_serial>` below the
/// sub-database's attribute directory.
pub struct AttributeVector {
    name: String,
    spec: AttributeSpec,
    created_serial: SerialNum,
    store: Arc<LoggedStore<AttributeState>>,
}

impl AttributeVector {
    /// Create a fresh vector at `serial`. The creation is flushed right away
    /// so an empty vector never holds back transaction log pruning.
    pub fn create(
        base_dir: &Path,
        sub_db_name: &str,
        spec: AttributeSpec,
        serial: SerialNum,
        populated: bool,
    ) -> Result<Self> {
        let dir = vector_dir(base_dir, &spec.name, serial);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        let store = LoggedStore::open(store_name(sub_db_name, &spec.name), dir)?;
        store.raise_serial(serial);
        store.apply_derived(&AttributeOp::Init {
            spec: spec.clone(),
            created_serial: serial,
            populated,
        })?;
        store.flush(serial)?;
        Ok(Self {
            name: spec.name.clone(),
            spec,
            created_serial: serial,
            store: Arc::new(store),
        })
    }

    /// Load a vector from an existing directory. Returns `None` when the
    /// directory never got its creation flushed.
    pub fn load(dir: PathBuf, sub_db_name: &str, name: &str) -> Result<Option<Self>> {
        let store = LoggedStore::<AttributeState>::open(store_name(sub_db_name, name), dir)?;
        let Some((spec, created_serial)) = store.read(|s| s.spec.clone().map(|spec| (spec, s.created_serial)))
        else {
            store.destroy()?;
            return Ok(None);
        };
        if spec.name != name {
            return Err(DocDbError::InvalidConfig(format!(
                "attribute directory for {} holds attribute {}",
                name, spec.name
            )));
        }
        Ok(Some(Self {
            name: name.to_string(),
            spec,
            created_serial,
            store: Arc::new(store),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &AttributeSpec {
        &self.spec
    }

    pub fn created_serial(&self) -> SerialNum {
        self.created_serial
    }

    pub fn is_populated(&self) -> bool {
        self.store.read(|s| s.populated)
    }

    pub fn get(&self, lid: Lid) -> Option<FieldValue> {
        self.store.read(|s| s.values.get(&lid).cloned())
    }

    pub fn num_values(&self) -> usize {
        self.store.read(|s| s.values.len())
    }

    /// Value this attribute derives from `doc`
    pub fn derive(&self, doc: &Document) -> Option<FieldValue> {
        doc.get(&self.spec.source_field)
            .and_then(|v| self.spec.data_type.convert(v))
    }

    /// Feed path: store the derived value of `doc` at `serial`
    pub fn put(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()> {
        let op = match self.derive(doc) {
            Some(value) => AttributeOp::Set { lid, value },
            None => AttributeOp::Clear { lid },
        };
        self.store.apply(serial, &op)?;
        Ok(())
    }

    pub fn remove(&self, serial: SerialNum, lid: Lid) -> Result<()> {
        self.store.apply(serial, &AttributeOp::Clear { lid })?;
        Ok(())
    }

    /// Reprocessing path: store a derived value without advancing the serial
    pub fn populate(&self, lid: Lid, doc: Option<&Document>) -> Result<()> {
        let op = match doc.and_then(|d| self.derive(d)) {
            Some(value) => AttributeOp::Set { lid, value },
            None => AttributeOp::Clear { lid },
        };
        self.store.apply_derived(&op)
    }

    pub fn mark_populated(&self) -> Result<()> {
        self.store.apply_derived(&AttributeOp::MarkPopulated)
    }

    pub fn raise_serial(&self, serial: SerialNum) {
        self.store.raise_serial(serial);
    }

    pub fn last_applied(&self) -> SerialNum {
        self.store.last_applied()
    }

    pub fn flush_all(&self) -> Result<SerialNum> {
        self.store.flush(SerialNum::MAX)
    }

    pub fn memory_usage(&self) -> usize {
        self.store.memory_usage()
    }

    pub fn flush_target(&self) -> Arc<dyn FlushTarget> {
        StoreFlushTarget::new(self.store.name().to_string(), FlushComponent::Attribute, &self.store)
            .into_target()
    }

    pub fn destroy(&self) -> Result<()> {
        self.store.destroy()
    }
}

fn store_name(sub_db_name: &str, attribute: &str) -> String {
    format!("{}.attribute.{}", sub_db_name, attribute)
}

pub(crate) fn vector_dir(base_dir: &Path, name: &str, serial: SerialNum) -> PathBuf {
    base_dir.join(format!("{}-{}", name, serial))
}

/// Split `<name>-<serial>` into its parts
pub(crate) fn parse_vector_dir(dir_name: &str) -> Option<(String, SerialNum)> {
    let (name, serial) = dir_name.rsplit_once('-')?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), serial.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use tempfile::TempDir;

    #[test]
    fn test_parse_vector_dir() {
        assert_eq!(parse_vector_dir("year-101"), Some(("year".to_string(), 101)));
        assert_eq!(parse_vector_dir("release-date-7"), Some(("release-date".to_string(), 7)));
        assert_eq!(parse_vector_dir("year"), None);
        assert_eq!(parse_vector_dir("-3"), None);
    }

    #[test]
    fn test_create_put_and_reload() {
        let tmp = TempDir::new().unwrap();
        let spec = AttributeSpec::new("year", DataType::Int64);
        let dir;
        {
            let vector = AttributeVector::create(tmp.path(), "ready", spec.clone(), 5, true).unwrap();
            dir = vector_dir(tmp.path(), "year", 5);
            vector
                .put(6, 1, &Document::new("id:a").with_field("year", "1999"))
                .unwrap();
            vector
                .put(7, 2, &Document::new("id:b").with_field("year", "n/a"))
                .unwrap();
            assert_eq!(vector.get(1), Some(FieldValue::Long(1999)));
            assert_eq!(vector.get(2), None);
            vector.flush_all().unwrap();
        }
        let vector = AttributeVector::load(dir, "ready", "year").unwrap().unwrap();
        assert_eq!(vector.created_serial(), 5);
        assert_eq!(vector.spec(), &spec);
        assert!(vector.is_populated());
        assert_eq!(vector.get(1), Some(FieldValue::Long(1999)));
    }

    #[test]
    fn test_unflushed_creation_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let dir = vector_dir(tmp.path(), "year", 3);
        std::fs::create_dir_all(&dir).unwrap();
        assert!(AttributeVector::load(dir.clone(), "ready", "year").unwrap().is_none());
        assert!(!dir.exists());
    }

    #[test]
    fn test_populate_keeps_serial() {
        let tmp = TempDir::new().unwrap();
        let spec = AttributeSpec::new("rating", DataType::Float64);
        let vector = AttributeVector::create(tmp.path(), "ready", spec, 10, false).unwrap();
        assert!(!vector.is_populated());
        vector
            .populate(1, Some(&Document::new("id:a").with_field("rating", 4.5)))
            .unwrap();
        vector.mark_populated().unwrap();
        assert_eq!(vector.last_applied(), 10);
        assert!(vector.is_populated());
        assert_eq!(vector.get(1), Some(FieldValue::Double(4.5)));
    }
}

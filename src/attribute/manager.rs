use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::vector::{parse_vector_dir, AttributeVector};
use crate::error::Result;
use crate::flush::FlushTargetList;
use crate::metastore::Lid;
use crate::models::{Document, FieldValue};
use crate::reconfig::AttributeReconfig;
use crate::schema::AttributeSpec;
use crate::serial::SerialNum;

/// Columnar attribute storage of one sub-database.
///
/// Active attributes are searchable. Attributes removed from the config
/// move to history: still fed and flushed, not searchable, until wiped.
pub trait AttributeManager: Send + Sync {
    /// Specs of the active attributes
    fn attribute_specs(&self) -> BTreeMap<String, AttributeSpec>;

    /// Specs of attributes kept in history
    fn history_specs(&self) -> BTreeMap<String, AttributeSpec>;

    fn get_value(&self, name: &str, lid: Lid) -> Option<FieldValue>;

    /// Get an active attribute vector
    fn get_attribute(&self, name: &str) -> Option<Arc<AttributeVector>>;

    fn put(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()>;

    fn remove(&self, serial: SerialNum, lid: Lid) -> Result<()>;

    /// Advance every vector to `serial` without a write
    fn raise_serial(&self, serial: SerialNum);

    /// Apply an attribute plan at `serial`. Returns the vectors that must be
    /// populated from stored documents.
    fn reconfigure(
        &self,
        plan: &AttributeReconfig,
        serial: SerialNum,
        has_documents: bool,
    ) -> Result<Vec<Arc<AttributeVector>>>;

    /// Active vectors still waiting for population
    fn unpopulated(&self) -> Vec<Arc<AttributeVector>>;

    /// Drop history attributes; returns the names actually removed
    fn wipe_history(&self, names: &[String]) -> Result<Vec<String>>;

    fn flush_targets(&self) -> FlushTargetList;

    fn memory_usage(&self) -> usize;
}

/// Attribute manager where every vector is its own logged store
pub struct LoggedAttributeManager {
    sub_db_name: String,
    dir: PathBuf,
    active: RwLock<BTreeMap<String, Arc<AttributeVector>>>,
    history: RwLock<BTreeMap<String, Arc<AttributeVector>>>,
}

impl LoggedAttributeManager {
    /// Load every attribute below `dir`. Attributes in `specs` become active
    /// (created at `config_serial` when missing or derived differently);
    /// the rest are history.
    pub fn open(
        sub_db_name: &str,
        dir: PathBuf,
        specs: &BTreeMap<String, AttributeSpec>,
        config_serial: SerialNum,
    ) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut loaded = load_newest_vectors(&dir, sub_db_name)?;

        let mut active = BTreeMap::new();
        for (name, spec) in specs {
            let vector = match loaded.remove(name) {
                Some(vector) if !vector.spec().derivation_differs(spec) => vector,
                stale => {
                    if let Some(old) = stale {
                        old.destroy()?;
                    }
                    debug!(sub_db = sub_db_name, attribute = %name, "Creating attribute at startup");
                    Arc::new(AttributeVector::create(
                        &dir,
                        sub_db_name,
                        spec.clone(),
                        config_serial,
                        false,
                    )?)
                }
            };
            active.insert(name.clone(), vector);
        }

        info!(
            sub_db = sub_db_name,
            active = active.len(),
            history = loaded.len(),
            "Loaded attributes"
        );
        Ok(Self {
            sub_db_name: sub_db_name.to_string(),
            dir,
            active: RwLock::new(active),
            history: RwLock::new(loaded),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn all_vectors(&self) -> Vec<Arc<AttributeVector>> {
        let active = self.active.read();
        let history = self.history.read();
        active.values().chain(history.values()).cloned().collect()
    }
}

/// Load the newest `<name>-<serial>` directory per attribute and delete
/// older generations.
fn load_newest_vectors(
    dir: &Path,
    sub_db_name: &str,
) -> Result<BTreeMap<String, Arc<AttributeVector>>> {
    let mut newest: BTreeMap<String, (SerialNum, PathBuf)> = BTreeMap::new();
    let mut stale = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let Some((name, serial)) = parse_vector_dir(&file_name.to_string_lossy()) else {
            warn!(path = %entry.path().display(), "Ignoring unknown directory in attribute dir");
            continue;
        };
        match newest.get(&name) {
            Some((current, _)) if *current >= serial => stale.push(entry.path()),
            _ => {
                if let Some((_, old)) = newest.insert(name, (serial, entry.path())) {
                    stale.push(old);
                }
            }
        }
    }
    for path in stale {
        debug!(path = %path.display(), "Removing superseded attribute generation");
        fs::remove_dir_all(path)?;
    }

    let mut vectors = BTreeMap::new();
    for (name, (_, path)) in newest {
        if let Some(vector) = AttributeVector::load(path, sub_db_name, &name)? {
            vectors.insert(name, Arc::new(vector));
        }
    }
    Ok(vectors)
}

impl AttributeManager for LoggedAttributeManager {
    fn attribute_specs(&self) -> BTreeMap<String, AttributeSpec> {
        self.active
            .read()
            .iter()
            .map(|(name, v)| (name.clone(), v.spec().clone()))
            .collect()
    }

    fn history_specs(&self) -> BTreeMap<String, AttributeSpec> {
        self.history
            .read()
            .iter()
            .map(|(name, v)| (name.clone(), v.spec().clone()))
            .collect()
    }

    fn get_value(&self, name: &str, lid: Lid) -> Option<FieldValue> {
        self.active.read().get(name).and_then(|v| v.get(lid))
    }

    fn get_attribute(&self, name: &str) -> Option<Arc<AttributeVector>> {
        self.active.read().get(name).cloned()
    }

    fn put(&self, serial: SerialNum, lid: Lid, doc: &Document) -> Result<()> {
        for vector in self.all_vectors() {
            vector.put(serial, lid, doc)?;
        }
        Ok(())
    }

    fn remove(&self, serial: SerialNum, lid: Lid) -> Result<()> {
        for vector in self.all_vectors() {
            vector.remove(serial, lid)?;
        }
        Ok(())
    }

    fn raise_serial(&self, serial: SerialNum) {
        for vector in self.all_vectors() {
            vector.raise_serial(serial);
        }
    }

    fn reconfigure(
        &self,
        plan: &AttributeReconfig,
        serial: SerialNum,
        has_documents: bool,
    ) -> Result<Vec<Arc<AttributeVector>>> {
        let mut active = self.active.write();
        let mut history = self.history.write();

        for name in &plan.to_history {
            if let Some(vector) = active.remove(name) {
                info!(sub_db = %self.sub_db_name, attribute = %name, serial, "Moving attribute to history");
                history.insert(name.clone(), vector);
            }
        }

        for name in &plan.restore {
            if let Some(vector) = history.remove(name) {
                info!(sub_db = %self.sub_db_name, attribute = %name, serial, "Restoring attribute from history");
                active.insert(name.clone(), vector);
            }
        }

        let mut to_populate = Vec::with_capacity(plan.populate.len());
        for spec in &plan.populate {
            let vector = Arc::new(AttributeVector::create(
                &self.dir,
                &self.sub_db_name,
                spec.clone(),
                serial,
                !has_documents,
            )?);
            let replaced = active.insert(spec.name.clone(), vector.clone());
            let superseded = history.remove(&spec.name);
            for old in replaced.into_iter().chain(superseded) {
                if old.created_serial() != serial {
                    old.destroy()?;
                }
            }
            info!(
                sub_db = %self.sub_db_name,
                attribute = %spec.name,
                serial,
                "Created attribute"
            );
            if has_documents {
                to_populate.push(vector);
            }
        }
        Ok(to_populate)
    }

    fn unpopulated(&self) -> Vec<Arc<AttributeVector>> {
        self.active
            .read()
            .values()
            .filter(|v| !v.is_populated())
            .cloned()
            .collect()
    }

    fn wipe_history(&self, names: &[String]) -> Result<Vec<String>> {
        let mut history = self.history.write();
        let mut wiped = Vec::new();
        for name in names {
            if let Some(vector) = history.remove(name) {
                vector.destroy()?;
                wiped.push(name.clone());
            }
        }
        if !wiped.is_empty() {
            info!(sub_db = %self.sub_db_name, attributes = ?wiped, "Wiped history attributes");
        }
        Ok(wiped)
    }

    fn flush_targets(&self) -> FlushTargetList {
        self.all_vectors().iter().map(|v| v.flush_target()).collect()
    }

    fn memory_usage(&self) -> usize {
        self.all_vectors().iter().map(|v| v.memory_usage()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use tempfile::TempDir;

    fn specs(list: &[AttributeSpec]) -> BTreeMap<String, AttributeSpec> {
        list.iter().map(|s| (s.name.clone(), s.clone())).collect()
    }

    fn doc(id: &str, year: i64) -> Document {
        Document::new(id).with_field("year", year).with_field("rating", 3.5)
    }

    #[test]
    fn test_history_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let year = AttributeSpec::new("year", DataType::Int64);
        let manager =
            LoggedAttributeManager::open("ready", tmp.path().join("attr"), &specs(&[year.clone()]), 0)
                .unwrap();
        manager.put(1, 1, &doc("id:a", 2001)).unwrap();

        let removed = AttributeReconfig::plan(&manager.attribute_specs(), &BTreeMap::new(), &BTreeMap::new());
        manager.reconfigure(&removed, 2, true).unwrap();
        assert!(manager.get_value("year", 1).is_none());
        assert!(manager.history_specs().contains_key("year"));

        // History is still fed
        manager.put(3, 1, &doc("id:a", 2002)).unwrap();

        let readded = AttributeReconfig::plan(
            &manager.attribute_specs(),
            &specs(&[year]),
            &manager.history_specs(),
        );
        assert_eq!(readded.restore, vec!["year".to_string()]);
        let tasks = manager.reconfigure(&readded, 4, true).unwrap();
        assert!(tasks.is_empty());
        assert_eq!(manager.get_value("year", 1), Some(FieldValue::Long(2002)));
    }

    #[test]
    fn test_new_attribute_needs_population_only_with_documents() {
        let tmp = TempDir::new().unwrap();
        let manager =
            LoggedAttributeManager::open("ready", tmp.path().join("attr"), &BTreeMap::new(), 0).unwrap();
        let rating = specs(&[AttributeSpec::new("rating", DataType::Float64)]);
        let plan = AttributeReconfig::plan(&BTreeMap::new(), &rating, &BTreeMap::new());

        let tasks = manager.reconfigure(&plan, 5, true).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].created_serial(), 5);
        assert_eq!(manager.unpopulated().len(), 1);

        let tmp2 = TempDir::new().unwrap();
        let empty =
            LoggedAttributeManager::open("ready", tmp2.path().join("attr"), &BTreeMap::new(), 0).unwrap();
        assert!(empty.reconfigure(&plan, 5, false).unwrap().is_empty());
        assert!(empty.unpopulated().is_empty());
    }

    #[test]
    fn test_reopen_keeps_newest_generation_and_history() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("attr");
        let year_int = AttributeSpec::new("year", DataType::Int64);
        let year_text = AttributeSpec::new("year", DataType::String);
        let genre = AttributeSpec::new("genre", DataType::String);
        {
            let manager = LoggedAttributeManager::open(
                "ready",
                dir.clone(),
                &specs(&[year_int.clone(), genre.clone()]),
                0,
            )
            .unwrap();
            let plan = AttributeReconfig::plan(
                &manager.attribute_specs(),
                &specs(&[year_text.clone()]),
                &manager.history_specs(),
            );
            manager.reconfigure(&plan, 7, false).unwrap();
            for target in manager.flush_targets() {
                target.flush(7).unwrap();
            }
        }
        assert!(!dir.join("year-0").exists());
        assert!(dir.join("year-7").exists());

        let manager =
            LoggedAttributeManager::open("ready", dir, &specs(&[year_text.clone()]), 7).unwrap();
        assert_eq!(manager.attribute_specs()["year"], year_text);
        assert_eq!(manager.history_specs().keys().collect::<Vec<_>>(), vec!["genre"]);

        assert_eq!(manager.wipe_history(&["genre".to_string()]).unwrap(), vec!["genre".to_string()]);
        assert!(manager.history_specs().is_empty());
        assert!(manager.wipe_history(&["genre".to_string()]).unwrap().is_empty());
    }
}

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persistence::{read_tagged_file, write_tagged_file};
use crate::schema::Schema;
use crate::serial::SerialNum;
use crate::util::{FileHeader, HeaderTag};

/// Immutable, versioned document database configuration.
///
/// Snapshots are shared as `Arc<ConfigSnapshot>` and never mutated; a new
/// config produces a new snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Config generation from the config distribution system
    pub generation: u64,
    /// Serial at which this snapshot was committed to the document database
    #[serde(default)]
    pub serial: SerialNum,
    pub doc_type: String,
    pub schema: Schema,
    #[serde(default)]
    pub rank_profiles: BTreeSet<String>,
}

impl ConfigSnapshot {
    pub fn new(generation: u64, doc_type: impl Into<String>, schema: Schema) -> Self {
        let mut rank_profiles = BTreeSet::new();
        rank_profiles.insert("default".to_string());
        Self {
            generation,
            serial: 0,
            doc_type: doc_type.into(),
            schema,
            rank_profiles,
        }
    }

    pub fn with_rank_profile(mut self, name: impl Into<String>) -> Self {
        self.rank_profiles.insert(name.into());
        self
    }

    pub fn with_serial(mut self, serial: SerialNum) -> Self {
        self.serial = serial;
        self
    }

    /// Summary field names
    pub fn summary_fields(&self) -> BTreeSet<String> {
        self.schema
            .fields
            .iter()
            .filter(|(_, spec)| spec.summary)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Persist as JSON in a header-tagged file
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(self)?;
        let header = FileHeader::new()
            .with_tag("generation", HeaderTag::Integer(self.generation as i64))
            .with_tag("serial", HeaderTag::Integer(self.serial as i64));
        write_tagged_file(path, header, &body)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        match read_tagged_file(path)? {
            Some((_, body)) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persistence::{read_tagged_file, write_tagged_file};
use crate::schema::Schema;
use crate::serial::SerialNum;
use crate::util::{FileHeader, HeaderTag};

/// Fields removed from the config whose data is still kept, and the serial
/// of the config change that last moved a field there.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryState {
    pub serial: SerialNum,
    pub schema: Schema,
}

impl HistoryState {
    pub fn is_empty(&self) -> bool {
        self.schema.is_empty()
    }

    /// History after moving from `old` to `new` at `serial`: fields dropped
    /// by `new` are added, fields `new` brings back are removed.
    pub fn after_change(&self, old: &Schema, new: &Schema, serial: SerialNum) -> HistoryState {
        let removed = old.difference(new);
        let schema = self.schema.difference(new).union(&removed);
        HistoryState {
            serial: if removed.is_empty() { self.serial } else { serial },
            schema,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let header = FileHeader::new().with_tag("serial", HeaderTag::Integer(self.serial as i64));
        write_tagged_file(path, header, &serde_json::to_vec_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        match read_tagged_file(path)? {
            Some((_, body)) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, FieldSpec};
    use tempfile::TempDir;

    #[test]
    fn test_history_follows_config_changes() {
        let v1 = Schema::new()
            .field("title", FieldSpec::text())
            .field("year", FieldSpec::attribute(DataType::Int64));
        let v2 = Schema::new().field("title", FieldSpec::text());

        let history = HistoryState::default().after_change(&v1, &v2, 7);
        assert_eq!(history.serial, 7);
        assert_eq!(history.schema.field_names(), vec!["year"]);

        // Re-adding the field takes it out of history, serial stays
        let back = history.after_change(&v2, &v1, 9);
        assert!(back.is_empty());
        assert_eq!(back.serial, 7);
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.json");
        assert!(HistoryState::load(&path).unwrap().is_none());

        let history = HistoryState {
            serial: 3,
            schema: Schema::new().field("year", FieldSpec::attribute(DataType::Int64)),
        };
        history.save(&path).unwrap();
        assert_eq!(HistoryState::load(&path).unwrap(), Some(history));
    }
}

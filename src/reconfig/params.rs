use super::snapshot::ConfigSnapshot;

/// Which aspects of the configuration changed between two snapshots.
///
/// Derived deterministically from the pair; the generation and commit
/// serial of the snapshots are not compared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconfigParams {
    pub schema_changed: bool,
    pub attributes_changed: bool,
    pub summary_changed: bool,
    pub index_changed: bool,
    pub rank_profiles_changed: bool,
    pub doc_type_changed: bool,
}

impl ReconfigParams {
    pub fn new(old: &ConfigSnapshot, new: &ConfigSnapshot) -> Self {
        Self {
            schema_changed: old.schema != new.schema,
            attributes_changed: old.schema.attribute_specs() != new.schema.attribute_specs(),
            summary_changed: old.summary_fields() != new.summary_fields(),
            index_changed: old.schema.index_schema() != new.schema.index_schema(),
            rank_profiles_changed: old.rank_profiles != new.rank_profiles,
            doc_type_changed: old.doc_type != new.doc_type,
        }
    }

    pub fn config_has_changed(&self) -> bool {
        self.schema_changed
            || self.attributes_changed
            || self.summary_changed
            || self.index_changed
            || self.rank_profiles_changed
            || self.doc_type_changed
    }

    pub fn should_attribute_manager_change(&self) -> bool {
        self.attributes_changed
    }

    pub fn should_summary_manager_change(&self) -> bool {
        self.summary_changed || self.schema_changed
    }

    pub fn should_index_manager_change(&self) -> bool {
        self.index_changed
    }

    /// Search views capture attributes, index schema and rank profiles
    pub fn should_search_view_change(&self) -> bool {
        self.attributes_changed || self.index_changed || self.rank_profiles_changed
    }

    pub fn should_feed_view_change(&self) -> bool {
        self.schema_changed || self.attributes_changed || self.index_changed
    }

    /// A document type rename cannot be applied to live data.
    pub fn requires_restart(&self) -> bool {
        self.doc_type_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, FieldSpec, Schema};

    fn base_schema() -> Schema {
        Schema::new()
            .field("title", FieldSpec::text())
            .field("year", FieldSpec::attribute(DataType::Int64))
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let a = ConfigSnapshot::new(1, "music", base_schema());
        let b = a.clone().with_serial(99);
        let params = ReconfigParams::new(&a, &b);
        assert!(!params.config_has_changed());
        assert_eq!(params, ReconfigParams::default());
    }

    #[test]
    fn test_attribute_change_detected() {
        let a = ConfigSnapshot::new(1, "music", base_schema());
        let b = ConfigSnapshot::new(
            2,
            "music",
            base_schema().field("rating", FieldSpec::attribute(DataType::Float64)),
        );
        let params = ReconfigParams::new(&a, &b);
        assert!(params.schema_changed);
        assert!(params.attributes_changed);
        assert!(params.summary_changed);
        assert!(!params.index_changed);
        assert!(params.should_search_view_change());
        assert!(!params.requires_restart());
    }

    #[test]
    fn test_index_only_change() {
        let a = ConfigSnapshot::new(1, "music", base_schema());
        let b = ConfigSnapshot::new(
            2,
            "music",
            base_schema().field("body", FieldSpec::text().with_summary(false)),
        );
        let params = ReconfigParams::new(&a, &b);
        assert!(params.index_changed);
        assert!(!params.attributes_changed);
        assert!(!params.summary_changed);
        assert!(params.should_index_manager_change());
    }

    #[test]
    fn test_doc_type_change_requires_restart() {
        let a = ConfigSnapshot::new(1, "music", base_schema());
        let b = ConfigSnapshot::new(2, "books", base_schema());
        assert!(ReconfigParams::new(&a, &b).requires_restart());
    }
}

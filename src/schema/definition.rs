//! Schema definitions
//!
//! A schema lists the document fields and how each one is stored: indexed
//! for text search, kept as an attribute (columnar value), or only in the
//! document summary.

use super::field_type::DataType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field data type
    pub data_type: DataType,

    /// Whether to index this field for text search (default: false)
    #[serde(default)]
    pub index: bool,

    /// Whether to keep this field as an attribute (default: false)
    #[serde(default)]
    pub attribute: bool,

    /// Source field the attribute is derived from (default: the field itself)
    #[serde(default)]
    pub attribute_source: Option<String>,

    /// Whether to include the field in document summaries (default: true)
    #[serde(default = "default_true")]
    pub summary: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FieldSpec {
    fn default() -> Self {
        Self {
            data_type: DataType::default(),
            index: false,
            attribute: false,
            attribute_source: None,
            summary: true,
        }
    }
}

impl FieldSpec {
    /// Create a new field spec with the given type
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            ..Default::default()
        }
    }

    /// Create an indexed text field
    pub fn text() -> Self {
        Self::new(DataType::String).with_index(true)
    }

    /// Create an attribute field
    pub fn attribute(data_type: DataType) -> Self {
        Self::new(data_type).with_attribute(true)
    }

    /// Set whether the field should be indexed
    pub fn with_index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    /// Set whether the field should be an attribute
    pub fn with_attribute(mut self, attribute: bool) -> Self {
        self.attribute = attribute;
        self
    }

    /// Derive the attribute from another document field
    pub fn derived_from(mut self, source: impl Into<String>) -> Self {
        self.attribute_source = Some(source.into());
        self
    }

    /// Set whether the field is part of summaries
    pub fn with_summary(mut self, summary: bool) -> Self {
        self.summary = summary;
        self
    }
}

/// How an attribute vector is derived from documents
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub data_type: DataType,
    pub source_field: String,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            source_field: name.clone(),
            name,
            data_type,
        }
    }

    /// True when `other` would produce different values for the same documents
    pub fn derivation_differs(&self, other: &AttributeSpec) -> bool {
        self.data_type != other.data_type || self.source_field != other.source_field
    }
}

/// Document schema
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Check if a field exists
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Attribute specs for every attribute field
    pub fn attribute_specs(&self) -> BTreeMap<String, AttributeSpec> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.attribute)
            .map(|(name, spec)| {
                let attr = AttributeSpec {
                    name: name.clone(),
                    data_type: spec.data_type,
                    source_field: spec
                        .attribute_source
                        .clone()
                        .unwrap_or_else(|| name.clone()),
                };
                (name.clone(), attr)
            })
            .collect()
    }

    /// Names of fields indexed for text search
    pub fn index_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.index)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Schema containing only the indexed fields
    pub fn index_schema(&self) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .filter(|(_, spec)| spec.index)
                .map(|(n, s)| (n.clone(), s.clone()))
                .collect(),
        }
    }

    /// Fields of both schemas. Fields present in both keep the spec from `self`.
    pub fn union(&self, other: &Schema) -> Schema {
        let mut fields = other.fields.clone();
        for (name, spec) in &self.fields {
            fields.insert(name.clone(), spec.clone());
        }
        Schema { fields }
    }

    /// Fields of `self` that are not in `other`
    pub fn difference(&self, other: &Schema) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .filter(|(name, _)| !other.has_field(name))
                .map(|(n, s)| (n.clone(), s.clone()))
                .collect(),
        }
    }
}

//! Field data types
//!
//! Defines how feed values are converted when stored in attributes.

use serde::{Deserialize, Serialize};

use crate::models::FieldValue;

/// Field data type
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 64-bit signed integer
    Int64,
    /// 64-bit floating point
    Float64,
    /// Boolean value
    Bool,
    /// UTF-8 string; the only type that can be indexed as text
    #[default]
    String,
}

impl DataType {
    /// Convert a feed value to this type. Returns `None` when the value
    /// cannot be represented (e.g. non-numeric text for `Int64`).
    pub fn convert(&self, value: &FieldValue) -> Option<FieldValue> {
        match (self, value) {
            (DataType::Int64, FieldValue::Long(v)) => Some(FieldValue::Long(*v)),
            (DataType::Int64, FieldValue::Double(v)) => Some(FieldValue::Long(*v as i64)),
            (DataType::Int64, FieldValue::Bool(v)) => Some(FieldValue::Long(*v as i64)),
            (DataType::Int64, FieldValue::Text(s)) => s.trim().parse().ok().map(FieldValue::Long),

            (DataType::Float64, FieldValue::Long(v)) => Some(FieldValue::Double(*v as f64)),
            (DataType::Float64, FieldValue::Double(v)) => Some(FieldValue::Double(*v)),
            (DataType::Float64, FieldValue::Bool(_)) => None,
            (DataType::Float64, FieldValue::Text(s)) => {
                s.trim().parse().ok().map(FieldValue::Double)
            }

            (DataType::Bool, FieldValue::Bool(v)) => Some(FieldValue::Bool(*v)),
            (DataType::Bool, FieldValue::Long(v)) => Some(FieldValue::Bool(*v != 0)),
            (DataType::Bool, FieldValue::Double(_)) => None,
            (DataType::Bool, FieldValue::Text(s)) => s.trim().parse().ok().map(FieldValue::Bool),

            (DataType::String, FieldValue::Text(s)) => Some(FieldValue::Text(s.clone())),
            (DataType::String, FieldValue::Long(v)) => Some(FieldValue::Text(v.to_string())),
            (DataType::String, FieldValue::Double(v)) => Some(FieldValue::Text(v.to_string())),
            (DataType::String, FieldValue::Bool(v)) => Some(FieldValue::Text(v.to_string())),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_conversion() {
        assert_eq!(
            DataType::Int64.convert(&FieldValue::Double(3.9)),
            Some(FieldValue::Long(3))
        );
        assert_eq!(
            DataType::Float64.convert(&FieldValue::Text(" 2.5 ".into())),
            Some(FieldValue::Double(2.5))
        );
        assert_eq!(DataType::Int64.convert(&FieldValue::Text("abc".into())), None);
    }

    #[test]
    fn test_string_conversion() {
        assert_eq!(
            DataType::String.convert(&FieldValue::Long(7)),
            Some(FieldValue::Text("7".into()))
        );
        assert_eq!(
            DataType::Bool.convert(&FieldValue::Text("true".into())),
            Some(FieldValue::Bool(true))
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&DataType::Float64).unwrap();
        assert_eq!(json, "\"float64\"");
        assert!(DataType::Int64.is_numeric());
        assert!(!DataType::String.is_numeric());
    }
}

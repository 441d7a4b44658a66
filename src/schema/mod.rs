//! Schema and field type system
//!
//! This module defines the document schema, including:
//! - Data types for attribute and index fields, and conversion of feed values
//! - Field specs (indexed, attribute, summary)
//! - Set operations used for union and history schemas

mod definition;
mod field_type;

pub use definition::{AttributeSpec, FieldSpec, Schema};
pub use field_type::DataType;

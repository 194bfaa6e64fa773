//! Table schema model and the fixed output schema.
//!
//! Schemas are compared field by field, in order. The output table is only
//! written to once its schema equals [`output_schema`] exactly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output column holding the originating record id.
pub const SOURCE_ID_FIELD: &str = "source_id";
/// Output column holding the record title.
pub const TITLE_FIELD: &str = "title";
/// Output column holding the generated analysis.
pub const ANALYSIS_FIELD: &str = "analysis";

/// Column type as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    /// Variable-length UTF-8 text with no declared maximum length.
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Date,
    Bytes,
    Record,
    /// Any type this crate does not model, kept verbatim.
    #[serde(untagged)]
    Other(String),
}

/// Column mode. Stores omit the mode for nullable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
    /// Declared maximum length for STRING/BYTES columns, absent when unbounded.
    #[serde(
        rename = "maxLength",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_length: Option<String>,
}

impl SchemaField {
    /// A `REQUIRED STRING` column.
    pub fn required_string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::String,
            mode: FieldMode::Required,
            max_length: None,
        }
    }
}

/// Ordered list of columns describing a table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

impl TableSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    /// Returns true if `other` has the same fields, in the same order, with
    /// the same types and modes.
    pub fn matches(&self, other: &TableSchema) -> bool {
        self == other
    }

    /// Names of the columns, in order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|field| format!("{} {:?} {:?}", field.name, field.field_type, field.mode))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// The schema every output table must carry.
///
/// All three columns are mandatory strings; `analysis` has no length bound so
/// generated text is never truncated.
pub fn output_schema() -> TableSchema {
    TableSchema::new(vec![
        SchemaField::required_string(SOURCE_ID_FIELD),
        SchemaField::required_string(TITLE_FIELD),
        SchemaField::required_string(ANALYSIS_FIELD),
    ])
}

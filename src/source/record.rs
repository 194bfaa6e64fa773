//! Input and output record types.

use serde_json::Value;
use snafu::prelude::*;

use crate::config::InputColumns;
use crate::error::{InvalidFieldSnafu, MissingColumnSnafu, NullIdSnafu, SourceError};
use crate::schema::{ANALYSIS_FIELD, SOURCE_ID_FIELD, TITLE_FIELD};
use crate::store::Row;

/// A product-labeling report read from the input table.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Identifier as stored; only its string form leaves this type.
    pub id: Value,
    pub title: String,
    pub comment: String,
}

impl SourceRecord {
    pub fn new(id: impl Into<Value>, title: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            comment: comment.into(),
        }
    }

    /// Map a store row using the configured column names.
    pub fn from_row(row: &Row, columns: &InputColumns) -> Result<Self, SourceError> {
        let id = column(row, &columns.id)?;
        ensure!(
            !id.is_null(),
            NullIdSnafu {
                column: columns.id.as_str()
            }
        );
        let source_id = id_string(id);
        let title = text_column(row, &columns.title, &source_id)?;
        let comment = text_column(row, &columns.comment, &source_id)?;

        Ok(Self {
            id: id.clone(),
            title,
            comment,
        })
    }

    /// String form of the identifier, as written to `source_id`.
    pub fn source_id(&self) -> String {
        id_string(&self.id)
    }
}

fn column<'a>(row: &'a Row, name: &str) -> Result<&'a Value, SourceError> {
    row.get(name).context(MissingColumnSnafu { column: name })
}

fn text_column(row: &Row, name: &str, source_id: &str) -> Result<String, SourceError> {
    column(row, name)?
        .as_str()
        .map(str::to_string)
        .context(InvalidFieldSnafu {
            column: name,
            source_id,
        })
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// A generated analysis, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRecord {
    pub source_id: String,
    pub title: String,
    pub analysis: String,
}

impl AnalysisRecord {
    pub fn new(record: &SourceRecord, analysis: impl Into<String>) -> Self {
        Self {
            source_id: record.source_id(),
            title: record.title.clone(),
            analysis: analysis.into(),
        }
    }

    /// Row keyed by the output schema's column names.
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(SOURCE_ID_FIELD.to_string(), Value::from(self.source_id.as_str()));
        row.insert(TITLE_FIELD.to_string(), Value::from(self.title.as_str()));
        row.insert(ANALYSIS_FIELD.to_string(), Value::from(self.analysis.as_str()));
        row
    }
}

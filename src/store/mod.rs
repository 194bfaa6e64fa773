//! Tabular store abstraction.
//!
//! The pipeline only talks to the store through [`TableStore`], so the
//! BigQuery client and the in-process [`MemoryStore`] are interchangeable.

mod bigquery;
mod memory;

pub use bigquery::{BigQueryOptions, BigQueryStore};
pub use memory::{InsertFault, MemoryStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::StoreError;
use crate::schema::TableSchema;

/// A reference-counted table store.
pub type TableStoreRef = Arc<dyn TableStore>;

/// One row as a column name to JSON value map.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Fully qualified table address inside the configured project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Result of a delete request. Absence is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// A row-level rejection reported by the store for an insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertRowError {
    /// Index of the rejected row within the request.
    pub index: usize,
    /// Short machine-readable reason, e.g. `invalid`.
    pub reason: String,
    pub message: String,
}

impl InsertRowError {
    pub fn new(index: usize, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Joins a list of rejections into one line for logs and error messages.
    pub fn summarize(errors: &[InsertRowError]) -> String {
        if errors.is_empty() {
            return "no details reported".to_string();
        }
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for InsertRowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {} ({})", self.index, self.message, self.reason)
    }
}

/// Operations the pipeline needs from a tabular store.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Check that a dataset exists and is reachable.
    async fn get_dataset(&self, dataset: &str) -> Result<(), StoreError>;

    /// Fetch a table's schema. Missing tables yield [`StoreError::NotFound`].
    async fn get_table(&self, table: &TableRef) -> Result<TableSchema, StoreError>;

    /// Delete a table.
    async fn delete_table(&self, table: &TableRef) -> Result<DeleteOutcome, StoreError>;

    /// Create a table with the given schema.
    async fn create_table(&self, table: &TableRef, schema: &TableSchema)
    -> Result<(), StoreError>;

    /// Run a SQL query and return every result row.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError>;

    /// Insert rows. An empty list means every row was accepted.
    async fn insert_rows(
        &self,
        table: &TableRef,
        rows: &[Row],
    ) -> Result<Vec<InsertRowError>, StoreError>;
}

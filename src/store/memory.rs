//! In-process [`TableStore`] used by tests.
//!
//! Faults can be scripted: insert rejections and transport errors are
//! consumed in order, and freshly created tables can be kept invisible for a
//! number of `get_table` polls to mimic eventual consistency.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use super::{DeleteOutcome, InsertRowError, Row, TableRef, TableStore};
use crate::error::{NotFoundSnafu, StoreApiSnafu, StoreError, StoreUnavailableSnafu};
use crate::metrics::events::StoreOperation;
use crate::schema::{FieldMode, FieldType, TableSchema};

static FROM_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bFROM\s+`?([A-Za-z0-9_.\-]+)`?").expect("valid regex")
});

/// A scripted outcome for the next insert call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertFault {
    /// The store answers but reports every row as rejected.
    Rejected(String),
    /// The request never gets an answer.
    Transport(String),
}

#[derive(Debug, Clone)]
struct TableData {
    schema: TableSchema,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct State {
    datasets: HashSet<String>,
    tables: HashMap<TableRef, TableData>,
    hidden: HashMap<TableRef, usize>,
    creation_lag: usize,
    insert_faults: VecDeque<InsertFault>,
    query_failure: Option<String>,
    create_failure: Option<String>,
    operations: Vec<StoreOperation>,
    insert_attempts: Vec<Instant>,
    queries: Vec<String>,
}

/// Table store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(self, dataset: impl Into<String>) -> Self {
        self.lock().datasets.insert(dataset.into());
        self
    }

    /// Add a table (and its dataset) with initial rows.
    pub fn with_table(self, table: TableRef, schema: TableSchema, rows: Vec<Row>) -> Self {
        {
            let mut state = self.lock();
            state.datasets.insert(table.dataset.clone());
            state.tables.insert(table, TableData { schema, rows });
        }
        self
    }

    /// Keep newly created tables invisible to the next `polls` lookups.
    /// `usize::MAX` keeps them invisible forever.
    pub fn with_creation_lag(self, polls: usize) -> Self {
        self.lock().creation_lag = polls;
        self
    }

    /// Queue outcomes for upcoming inserts; once drained inserts behave normally.
    pub fn with_insert_faults(self, faults: impl IntoIterator<Item = InsertFault>) -> Self {
        self.lock().insert_faults.extend(faults);
        self
    }

    /// Fail every query with an API error.
    pub fn with_query_failure(self, message: impl Into<String>) -> Self {
        self.lock().query_failure = Some(message.into());
        self
    }

    /// Fail every table creation with an API error.
    pub fn with_create_failure(self, message: impl Into<String>) -> Self {
        self.lock().create_failure = Some(message.into());
        self
    }

    /// Rows currently stored in `table`.
    pub fn rows(&self, table: &TableRef) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|data| data.rows.clone())
            .unwrap_or_default()
    }

    /// Schema of `table`, ignoring creation lag.
    pub fn schema(&self, table: &TableRef) -> Option<TableSchema> {
        self.lock().tables.get(table).map(|data| data.schema.clone())
    }

    /// Every operation issued so far, in order.
    pub fn operations(&self) -> Vec<StoreOperation> {
        self.lock().operations.clone()
    }

    /// When each insert call arrived.
    pub fn insert_attempts(&self) -> Vec<Instant> {
        self.lock().insert_attempts.clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, operation: StoreOperation) -> MutexGuard<'_, State> {
        let mut state = self.lock();
        state.operations.push(operation);
        state
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn get_dataset(&self, dataset: &str) -> Result<(), StoreError> {
        let state = self.record(StoreOperation::GetDataset);
        ensure_found(state.datasets.contains(dataset), || {
            format!("Dataset {dataset}")
        })
    }

    async fn get_table(&self, table: &TableRef) -> Result<TableSchema, StoreError> {
        let mut state = self.record(StoreOperation::GetTable);
        if let Some(remaining) = state.hidden.get_mut(table) {
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return NotFoundSnafu {
                    resource: format!("Table {table}"),
                }
                .fail();
            }
        }
        match state.tables.get(table) {
            Some(data) => Ok(data.schema.clone()),
            None => NotFoundSnafu {
                resource: format!("Table {table}"),
            }
            .fail(),
        }
    }

    async fn delete_table(&self, table: &TableRef) -> Result<DeleteOutcome, StoreError> {
        let mut state = self.record(StoreOperation::DeleteTable);
        state.hidden.remove(table);
        Ok(match state.tables.remove(table) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<(), StoreError> {
        let mut state = self.record(StoreOperation::CreateTable);
        if let Some(message) = state.create_failure.clone() {
            return StoreApiSnafu {
                status: 403u16,
                message,
            }
            .fail();
        }
        ensure_found(state.datasets.contains(&table.dataset), || {
            format!("Dataset {}", table.dataset)
        })?;
        if state.tables.contains_key(table) {
            return StoreApiSnafu {
                status: 409u16,
                message: format!("Already Exists: Table {table}"),
            }
            .fail();
        }
        state.tables.insert(
            table.clone(),
            TableData {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        let lag = state.creation_lag;
        if lag > 0 {
            state.hidden.insert(table.clone(), lag);
        }
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let mut state = self.record(StoreOperation::Query);
        state.queries.push(sql.to_string());
        if let Some(message) = state.query_failure.clone() {
            return StoreApiSnafu {
                status: 400u16,
                message,
            }
            .fail();
        }

        let table = referenced_table(sql).ok_or_else(|| {
            StoreApiSnafu {
                status: 400u16,
                message: format!("Unsupported query: {sql}"),
            }
            .build()
        })?;
        match state.tables.get(&table) {
            Some(data) => Ok(data.rows.clone()),
            None => NotFoundSnafu {
                resource: format!("Table {table}"),
            }
            .fail(),
        }
    }

    async fn insert_rows(
        &self,
        table: &TableRef,
        rows: &[Row],
    ) -> Result<Vec<InsertRowError>, StoreError> {
        let mut state = self.record(StoreOperation::InsertRows);
        state.insert_attempts.push(Instant::now());

        match state.insert_faults.pop_front() {
            Some(InsertFault::Transport(message)) => {
                return StoreUnavailableSnafu { message }.fail();
            }
            Some(InsertFault::Rejected(message)) => {
                return Ok((0..rows.len())
                    .map(|index| InsertRowError::new(index, "invalid", message.clone()))
                    .collect());
            }
            None => {}
        }

        let Some(data) = state.tables.get_mut(table) else {
            return NotFoundSnafu {
                resource: format!("Table {table}"),
            }
            .fail();
        };

        let errors: Vec<InsertRowError> = rows
            .iter()
            .enumerate()
            .flat_map(|(index, row)| validate_row(&data.schema, index, row))
            .collect();
        // insertAll is all-or-nothing by default
        if errors.is_empty() {
            data.rows.extend(rows.iter().cloned());
        }
        Ok(errors)
    }
}

fn ensure_found(found: bool, resource: impl FnOnce() -> String) -> Result<(), StoreError> {
    if found {
        Ok(())
    } else {
        NotFoundSnafu {
            resource: resource(),
        }
        .fail()
    }
}

/// Table named in the `FROM` clause, using its last two path components.
fn referenced_table(sql: &str) -> Option<TableRef> {
    let path = FROM_TABLE.captures(sql)?.get(1)?.as_str();
    let mut parts = path.rsplit('.');
    let table = parts.next()?;
    let dataset = parts.next()?;
    Some(TableRef::new(dataset, table))
}

fn validate_row(schema: &TableSchema, index: usize, row: &Row) -> Vec<InsertRowError> {
    let mut errors = Vec::new();
    for name in row.keys() {
        if !schema.fields.iter().any(|field| &field.name == name) {
            errors.push(InsertRowError::new(
                index,
                "invalid",
                format!("no such field: {name}"),
            ));
        }
    }
    for field in &schema.fields {
        match row.get(&field.name) {
            None | Some(Value::Null) if field.mode == FieldMode::Required => {
                errors.push(InsertRowError::new(
                    index,
                    "invalid",
                    format!("Missing required field: {}", field.name),
                ));
            }
            Some(value) if field.field_type == FieldType::String && !value.is_string() => {
                if !value.is_null() {
                    errors.push(InsertRowError::new(
                        index,
                        "invalid",
                        format!("Cannot convert value to string: {}", field.name),
                    ));
                }
            }
            _ => {}
        }
    }
    errors
}

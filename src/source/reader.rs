//! Full-table reader for the input table.

use tracing::{debug, info};

use super::SourceRecord;
use crate::config::InputColumns;
use crate::emit;
use crate::error::{SourceError, StoreError};
use crate::metrics::events::RecordsFetched;
use crate::store::{TableRef, TableStoreRef};

/// One input row: a usable record, or the reason it is not one.
pub type FetchedRecord = Result<SourceRecord, SourceError>;

/// Reads every row of the input table, in store order.
pub struct SourceReader {
    store: TableStoreRef,
    project: String,
    input: TableRef,
    columns: InputColumns,
}

impl SourceReader {
    pub fn new(
        store: TableStoreRef,
        project: impl Into<String>,
        input: TableRef,
        columns: InputColumns,
    ) -> Self {
        Self {
            store,
            project: project.into(),
            input,
            columns,
        }
    }

    /// The query issued by [`fetch`](Self::fetch). No filter: every run reads
    /// the whole table.
    pub fn query_sql(&self) -> String {
        format!(
            "SELECT `{}`, `{}`, `{}` FROM `{}.{}.{}`",
            self.columns.id,
            self.columns.title,
            self.columns.comment,
            self.project,
            self.input.dataset,
            self.input.table,
        )
    }

    /// Run the query and map each row. A failed query is returned as an
    /// error; a malformed row is returned in place as a [`SourceError`].
    pub async fn fetch(&self) -> Result<Vec<FetchedRecord>, StoreError> {
        let sql = self.query_sql();
        debug!(%sql, "Querying input table");

        let rows = self.store.query(&sql).await?;
        emit!(RecordsFetched {
            count: rows.len() as u64
        });
        info!(table = %self.input, rows = rows.len(), "Fetched source records");

        Ok(rows
            .iter()
            .map(|row| SourceRecord::from_row(row, &self.columns))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use crate::store::{MemoryStore, Row};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_query_reads_whole_table() {
        let reader = SourceReader::new(
            Arc::new(MemoryStore::new()),
            "website-401719",
            TableRef::new("db_informacion", "Info"),
            InputColumns::default(),
        );
        assert_eq!(
            reader.query_sql(),
            "SELECT `Id`, `Titulo`, `Comentario` FROM `website-401719.db_informacion.Info`"
        );
    }

    #[tokio::test]
    async fn test_fetch_keeps_order_and_isolates_bad_rows() {
        let input = TableRef::new("db", "info");
        let store = MemoryStore::new().with_table(
            input.clone(),
            TableSchema::default(),
            vec![
                row(json!({"Id": 1, "Titulo": "a", "Comentario": "x"})),
                row(json!({"Id": 2, "Titulo": 5, "Comentario": "y"})),
                row(json!({"Id": 3, "Titulo": "c", "Comentario": "z"})),
            ],
        );
        let reader = SourceReader::new(Arc::new(store), "p", input, InputColumns::default());

        let fetched = reader.fetch().await.unwrap();
        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched[0].as_ref().unwrap().source_id(), "1");
        assert_eq!(fetched[1].as_ref().unwrap_err().source_id(), Some("2"));
        assert_eq!(fetched[2].as_ref().unwrap().title, "c");
    }

    #[tokio::test]
    async fn test_failed_query_is_an_error() {
        let input = TableRef::new("db", "info");
        let store = MemoryStore::new()
            .with_table(input.clone(), TableSchema::default(), vec![])
            .with_query_failure("Access Denied");
        let reader = SourceReader::new(Arc::new(store), "p", input, InputColumns::default());
        assert!(matches!(
            reader.fetch().await.unwrap_err(),
            StoreError::StoreApi { .. }
        ));
    }
}

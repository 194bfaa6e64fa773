//! Row-at-a-time writer for analysis records.

use tracing::{debug, warn};

use super::retry::{Exhausted, RetryPolicy};
use crate::emit;
use crate::error::{StoreError, WriteError};
use crate::metrics::events::{InsertAttempted, InsertOutcome};
use crate::source::AnalysisRecord;
use crate::store::{InsertRowError, Row, TableRef, TableStoreRef};

/// Why a single insert attempt failed.
#[derive(Debug)]
enum AttemptFailure {
    Rejected(Vec<InsertRowError>),
    Transport(StoreError),
}

impl From<Exhausted<AttemptFailure>> for WriteError {
    fn from(exhausted: Exhausted<AttemptFailure>) -> Self {
        let attempts = exhausted.attempts;
        match exhausted.error {
            AttemptFailure::Rejected(last_errors) => WriteError::ExhaustedRetries {
                attempts,
                last_errors,
            },
            AttemptFailure::Transport(source) => WriteError::Transport { attempts, source },
        }
    }
}

/// Inserts one analysis row per call, retrying rejected or failed inserts
/// under a [`RetryPolicy`].
pub struct RetryingWriter {
    store: TableStoreRef,
    table: TableRef,
    policy: RetryPolicy,
}

impl RetryingWriter {
    pub fn new(store: TableStoreRef, table: TableRef, policy: RetryPolicy) -> Self {
        Self {
            store,
            table,
            policy,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub async fn write(&self, record: &AnalysisRecord) -> Result<(), WriteError> {
        let rows = [record.to_row()];
        let source_id = record.source_id.as_str();

        self.policy
            .run(|attempt| self.try_insert(&rows, source_id, attempt))
            .await
            .map_err(WriteError::from)?;

        debug!(source_id, table = %self.table, "Analysis row written");
        Ok(())
    }

    async fn try_insert(
        &self,
        rows: &[Row],
        source_id: &str,
        attempt: u32,
    ) -> Result<(), AttemptFailure> {
        match self.store.insert_rows(&self.table, rows).await {
            Ok(errors) if errors.is_empty() => {
                emit!(InsertAttempted {
                    outcome: InsertOutcome::Accepted
                });
                Ok(())
            }
            Ok(errors) => {
                emit!(InsertAttempted {
                    outcome: InsertOutcome::Rejected
                });
                warn!(
                    source_id,
                    attempt = attempt + 1,
                    errors = %InsertRowError::summarize(&errors),
                    "Insert rejected by store"
                );
                Err(AttemptFailure::Rejected(errors))
            }
            Err(e) => {
                emit!(InsertAttempted {
                    outcome: InsertOutcome::Transport
                });
                warn!(
                    source_id,
                    attempt = attempt + 1,
                    error = %snafu::Report::from_error(&e),
                    "Insert request failed"
                );
                Err(AttemptFailure::Transport(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::output_schema;
    use crate::source::SourceRecord;
    use crate::store::{InsertFault, MemoryStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn output() -> TableRef {
        TableRef::new("db", "info_detalle")
    }

    fn analysis() -> AnalysisRecord {
        AnalysisRecord::new(&SourceRecord::new(1, "Etiqueta borrosa", "c"), "Análisis: ...")
    }

    fn writer(store: Arc<MemoryStore>) -> RetryingWriter {
        RetryingWriter::new(store, output(), RetryPolicy::default())
    }

    fn store_with(faults: Vec<InsertFault>) -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new()
                .with_table(output(), output_schema(), vec![])
                .with_insert_faults(faults),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_succeeds_without_waiting() {
        let store = store_with(vec![]);
        let start = Instant::now();

        writer(store.clone()).write(&analysis()).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(store.rows(&output()), vec![analysis().to_row()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_three_attempts_with_backoff() {
        let rejected = || InsertFault::Rejected("backendError".to_string());
        let store = store_with(vec![rejected(), rejected(), rejected()]);

        let err = writer(store.clone()).write(&analysis()).await.unwrap_err();

        match err {
            WriteError::ExhaustedRetries {
                attempts,
                last_errors,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_errors, vec![InsertRowError::new(0, "invalid", "backendError")]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let attempts = store.insert_attempts();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(1));
        assert_eq!(attempts[2] - attempts[1], Duration::from_secs(2));
        assert!(store.rows(&output()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transport_error() {
        let store = store_with(vec![InsertFault::Transport("connection reset".to_string())]);

        writer(store.clone()).write(&analysis()).await.unwrap();

        assert_eq!(store.insert_attempts().len(), 2);
        assert_eq!(store.rows(&output()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_transport_error_surfaces_as_transport() {
        let store = store_with(vec![
            InsertFault::Rejected("backendError".to_string()),
            InsertFault::Rejected("backendError".to_string()),
            InsertFault::Transport("connection reset".to_string()),
        ]);

        let err = writer(store).write(&analysis()).await.unwrap_err();
        assert!(matches!(err, WriteError::Transport { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_table_is_retried_then_reported() {
        let store = Arc::new(MemoryStore::new().with_dataset("db"));

        let err = writer(store.clone()).write(&analysis()).await.unwrap_err();
        match err {
            WriteError::Transport { source, .. } => assert!(source.is_not_found()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.insert_attempts().len(), 3);
    }
}

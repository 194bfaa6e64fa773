//! Pre-flight checks and output table repair.
//!
//! Runs once per pipeline run, before any record is read:
//! 1. The credential file must exist (checked locally, no network call).
//! 2. The dataset must exist.
//! 3. The input table must exist. It is never created.
//! 4. The output table is reconciled according to [`OutputPolicy`].
//! 5. The output table is polled until it reports the output schema.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::emit;
use crate::error::{
    ConfigurationSnafu, CreationTimeoutSnafu, ReadinessError, ResourceCreationSnafu, ResourceKind,
    ResourceNotFoundSnafu,
};
use crate::gcp::CredentialFile;
use crate::metrics::events::{OutputTableReconciled, ReadinessCompleted};
use crate::schema::{TableSchema, output_schema};
use crate::store::{DeleteOutcome, TableRef, TableStoreRef};

/// What to do with an output table left over from a previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPolicy {
    /// Drop and recreate on every run.
    #[default]
    Replace,
    /// Keep the table when its schema already matches.
    Append,
}

/// How the output table was brought into shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// No table existed; a new one was created.
    Created,
    /// An existing table was dropped and created again.
    Recreated,
    /// An existing table with the right schema was kept.
    Reused,
}

impl ReconcileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::Created => "created",
            ReconcileAction::Recreated => "recreated",
            ReconcileAction::Reused => "reused",
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interval and upper bound for waiting on a new output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct ResourceReadinessChecker {
    store: TableStoreRef,
    credentials: Arc<CredentialFile>,
    dataset: String,
    input: TableRef,
    output: TableRef,
    policy: OutputPolicy,
    poll: PollSettings,
    schema: TableSchema,
}

impl ResourceReadinessChecker {
    pub fn new(
        store: TableStoreRef,
        credentials: Arc<CredentialFile>,
        input: TableRef,
        output: TableRef,
    ) -> Self {
        Self {
            store,
            credentials,
            dataset: output.dataset.clone(),
            input,
            output,
            policy: OutputPolicy::default(),
            poll: PollSettings::default(),
            schema: output_schema(),
        }
    }

    pub fn with_policy(mut self, policy: OutputPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Verify inputs and bring the output table to the output schema.
    pub async fn ensure_ready(&self) -> Result<ReconcileAction, ReadinessError> {
        let start = Instant::now();

        ensure!(
            self.credentials.is_present(),
            ConfigurationSnafu {
                path: self.credentials.path()
            }
        );

        self.store
            .get_dataset(&self.dataset)
            .await
            .context(ResourceNotFoundSnafu {
                kind: ResourceKind::Namespace,
                name: self.dataset.as_str(),
            })?;
        debug!(dataset = %self.dataset, "Dataset is reachable");

        self.store
            .get_table(&self.input)
            .await
            .context(ResourceNotFoundSnafu {
                kind: ResourceKind::Input,
                name: self.input.to_string(),
            })?;
        debug!(table = %self.input, "Input table is reachable");

        let action = self.reconcile_output().await?;
        emit!(OutputTableReconciled {
            action: action.as_str()
        });

        if action != ReconcileAction::Reused {
            self.wait_until_visible().await?;
        }

        emit!(ReadinessCompleted {
            duration: start.elapsed()
        });
        info!(
            table = %self.output,
            action = %action,
            policy = ?self.policy,
            "Output table ready"
        );
        Ok(action)
    }

    async fn reconcile_output(&self) -> Result<ReconcileAction, ReadinessError> {
        match self.policy {
            OutputPolicy::Replace => self.recreate_output().await,
            OutputPolicy::Append => match self.store.get_table(&self.output).await {
                Ok(existing) if existing.matches(&self.schema) => Ok(ReconcileAction::Reused),
                Ok(existing) => {
                    warn!(
                        table = %self.output,
                        found = %existing,
                        expected = %self.schema,
                        "Output table schema differs, recreating"
                    );
                    self.recreate_output().await
                }
                Err(e) if e.is_not_found() => {
                    self.create_output().await?;
                    Ok(ReconcileAction::Created)
                }
                Err(e) => Err(e).context(ResourceCreationSnafu {
                    table: self.output.to_string(),
                }),
            },
        }
    }

    async fn recreate_output(&self) -> Result<ReconcileAction, ReadinessError> {
        let outcome = self
            .store
            .delete_table(&self.output)
            .await
            .context(ResourceCreationSnafu {
                table: self.output.to_string(),
            })?;
        self.create_output().await?;

        Ok(match outcome {
            DeleteOutcome::Deleted => ReconcileAction::Recreated,
            DeleteOutcome::NotFound => ReconcileAction::Created,
        })
    }

    async fn create_output(&self) -> Result<(), ReadinessError> {
        self.store
            .create_table(&self.output, &self.schema)
            .await
            .context(ResourceCreationSnafu {
                table: self.output.to_string(),
            })?;
        info!(table = %self.output, "Created output table");
        Ok(())
    }

    /// Poll until the output table reports the output schema.
    async fn wait_until_visible(&self) -> Result<(), ReadinessError> {
        let start = Instant::now();
        loop {
            match self.store.get_table(&self.output).await {
                Ok(schema) if schema.matches(&self.schema) => return Ok(()),
                Ok(schema) => {
                    debug!(table = %self.output, found = %schema, "Output schema not settled yet");
                }
                Err(e) => {
                    debug!(table = %self.output, error = %e, "Output table not visible yet");
                }
            }

            let waited = start.elapsed();
            if waited >= self.poll.timeout {
                return CreationTimeoutSnafu {
                    table: self.output.to_string(),
                    waited,
                }
                .fail();
            }
            tokio::time::sleep(self.poll.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::metrics::events::StoreOperation;
    use crate::schema::SchemaField;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn input() -> TableRef {
        TableRef::new("db_informacion", "Info")
    }

    fn output() -> TableRef {
        TableRef::new("db_informacion", "info_detalle")
    }

    fn credentials() -> (NamedTempFile, Arc<CredentialFile>) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"token").unwrap();
        let creds = Arc::new(CredentialFile::new(file.path()));
        (file, creds)
    }

    fn base_store() -> MemoryStore {
        MemoryStore::new().with_table(input(), TableSchema::default(), vec![])
    }

    fn checker(store: Arc<MemoryStore>, creds: Arc<CredentialFile>) -> ResourceReadinessChecker {
        ResourceReadinessChecker::new(store, creds, input(), output())
    }

    fn stale_schema() -> TableSchema {
        TableSchema::new(vec![
            SchemaField::required_string("source_id"),
            SchemaField::required_string("title"),
        ])
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_any_store_call() {
        let dir = tempfile::tempdir().unwrap();
        let creds = Arc::new(CredentialFile::new(dir.path().join("missing.json")));
        let store = Arc::new(base_store());

        let err = checker(store.clone(), creds).ensure_ready().await.unwrap_err();

        assert!(matches!(err, ReadinessError::Configuration { .. }));
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dataset() {
        let (_file, creds) = credentials();
        let store = Arc::new(MemoryStore::new());

        let err = checker(store, creds).ensure_ready().await.unwrap_err();
        assert!(matches!(
            err,
            ReadinessError::ResourceNotFound {
                kind: ResourceKind::Namespace,
                ..
            }
        ));
        assert_eq!(err.to_string(), "Dataset 'db_informacion' not found or not accessible");
    }

    #[tokio::test]
    async fn test_missing_input_is_never_created() {
        let (_file, creds) = credentials();
        let store = Arc::new(MemoryStore::new().with_dataset("db_informacion"));

        let err = checker(store.clone(), creds).ensure_ready().await.unwrap_err();

        assert!(matches!(
            err,
            ReadinessError::ResourceNotFound {
                kind: ResourceKind::Input,
                ..
            }
        ));
        assert!(!store.operations().contains(&StoreOperation::CreateTable));
        assert!(store.schema(&input()).is_none());
    }

    #[tokio::test]
    async fn test_replace_recreates_stale_output() {
        let (_file, creds) = credentials();
        let store = Arc::new(base_store().with_table(
            output(),
            stale_schema(),
            vec![json!({"source_id": "9", "title": "old"}).as_object().unwrap().clone()],
        ));

        let action = checker(store.clone(), creds).ensure_ready().await.unwrap();

        assert_eq!(action, ReconcileAction::Recreated);
        assert_eq!(store.schema(&output()), Some(output_schema()));
        assert!(store.rows(&output()).is_empty());
    }

    #[tokio::test]
    async fn test_replace_drops_matching_output_too() {
        let (_file, creds) = credentials();
        let row = json!({"source_id": "1", "title": "t", "analysis": "a"});
        let store = Arc::new(base_store().with_table(
            output(),
            output_schema(),
            vec![row.as_object().unwrap().clone()],
        ));

        let action = checker(store.clone(), creds).ensure_ready().await.unwrap();

        assert_eq!(action, ReconcileAction::Recreated);
        assert!(store.rows(&output()).is_empty());
    }

    #[tokio::test]
    async fn test_replace_creates_absent_output() {
        let (_file, creds) = credentials();
        let store = Arc::new(base_store());

        let action = checker(store.clone(), creds).ensure_ready().await.unwrap();

        assert_eq!(action, ReconcileAction::Created);
        assert_eq!(store.schema(&output()), Some(output_schema()));
    }

    #[tokio::test]
    async fn test_append_keeps_matching_output_and_rows() {
        let (_file, creds) = credentials();
        let row = json!({"source_id": "1", "title": "t", "analysis": "a"});
        let store = Arc::new(base_store().with_table(
            output(),
            output_schema(),
            vec![row.as_object().unwrap().clone()],
        ));

        let action = checker(store.clone(), creds)
            .with_policy(OutputPolicy::Append)
            .ensure_ready()
            .await
            .unwrap();

        assert_eq!(action, ReconcileAction::Reused);
        assert_eq!(store.rows(&output()).len(), 1);
        assert!(!store.operations().contains(&StoreOperation::DeleteTable));
    }

    #[tokio::test]
    async fn test_append_recreates_mismatched_output() {
        let (_file, creds) = credentials();
        let store = Arc::new(base_store().with_table(output(), stale_schema(), vec![]));

        let action = checker(store.clone(), creds)
            .with_policy(OutputPolicy::Append)
            .ensure_ready()
            .await
            .unwrap();

        assert_eq!(action, ReconcileAction::Recreated);
        assert_eq!(store.schema(&output()), Some(output_schema()));
    }

    #[tokio::test]
    async fn test_create_failure() {
        let (_file, creds) = credentials();
        let store = Arc::new(base_store().with_create_failure("Access Denied"));

        let err = checker(store, creds).ensure_ready().await.unwrap_err();
        match err {
            ReadinessError::ResourceCreation { table, source } => {
                assert_eq!(table, "db_informacion.info_detalle");
                assert!(matches!(source, StoreError::StoreApi { status: 403, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_output_visible() {
        let (_file, creds) = credentials();
        let store = Arc::new(base_store().with_creation_lag(3));

        let start = Instant::now();
        let action = checker(store.clone(), creds)
            .with_poll(PollSettings {
                interval: Duration::from_secs(2),
                timeout: Duration::from_secs(30),
            })
            .ensure_ready()
            .await
            .unwrap();

        assert_eq!(action, ReconcileAction::Created);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_never_visible_times_out() {
        let (_file, creds) = credentials();
        let store = Arc::new(base_store().with_creation_lag(usize::MAX));

        let err = checker(store, creds)
            .with_poll(PollSettings {
                interval: Duration::from_secs(1),
                timeout: Duration::from_secs(5),
            })
            .ensure_ready()
            .await
            .unwrap_err();

        match err {
            ReadinessError::CreationTimeout { waited, .. } => {
                assert!(waited >= Duration::from_secs(5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

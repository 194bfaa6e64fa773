//! Main processing pipeline.
//!
//! One run, strictly in sequence:
//! readiness check, full input fetch, then enrich and write each record in
//! store order. Only readiness and fetch failures abort the run; a record
//! that fails is logged, counted and kept in the result.

use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dlq::DeadLetterQueue;
use crate::emit;
use crate::enrich::RecordEnricher;
use crate::error::{
    BuildGeneratorSnafu, BuildStoreSnafu, DlqSnafu, FetchSnafu, GenerationSnafu, PipelineError,
    ReadinessSnafu, RecordError, WriteSnafu,
};
use crate::gcp::{self, CredentialFile};
use crate::generate::{TextGeneratorRef, VertexGenerator, VertexOptions};
use crate::metrics::events::{FailureStage, RecordFailed, RecordProcessed, RecordStatus};
use crate::readiness::{ReconcileAction, ResourceReadinessChecker};
use crate::sink::RetryingWriter;
use crate::source::{FetchedRecord, SourceReader, SourceRecord};
use crate::store::{BigQueryOptions, BigQueryStore, TableStoreRef};

/// One record that could not be processed.
#[derive(Debug)]
pub struct RecordFailure {
    /// Id of the record, if the row had a readable one.
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub error: RecordError,
}

impl RecordFailure {
    fn for_record(record: &SourceRecord, error: RecordError) -> Self {
        Self {
            source_id: Some(record.source_id()),
            title: Some(record.title.clone()),
            error,
        }
    }

    pub fn stage(&self) -> FailureStage {
        self.error.stage()
    }
}

/// Outcome of a run that got past the readiness check and the fetch.
#[derive(Debug)]
pub struct PipelineRunResult {
    /// How the output table was prepared.
    pub output_action: ReconcileAction,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
}

impl PipelineRunResult {
    fn new(output_action: ReconcileAction) -> Self {
        Self {
            output_action,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

/// Wires the readiness checker, reader, enricher and writer together.
pub struct PipelineRunner {
    readiness: ResourceReadinessChecker,
    reader: SourceReader,
    enricher: RecordEnricher,
    writer: RetryingWriter,
    dlq: Option<DeadLetterQueue>,
}

impl PipelineRunner {
    pub fn new(
        readiness: ResourceReadinessChecker,
        reader: SourceReader,
        enricher: RecordEnricher,
        writer: RetryingWriter,
    ) -> Self {
        Self {
            readiness,
            reader,
            enricher,
            writer,
            dlq: None,
        }
    }

    pub fn with_dlq(mut self, dlq: Option<DeadLetterQueue>) -> Self {
        self.dlq = dlq;
        self
    }

    /// Build a runner from configuration around the given clients.
    pub fn from_config(
        config: &Config,
        credentials: Arc<CredentialFile>,
        store: TableStoreRef,
        generator: TextGeneratorRef,
    ) -> Self {
        let input = config.store.input();
        let output = config.store.output();

        let readiness =
            ResourceReadinessChecker::new(store.clone(), credentials, input.clone(), output.clone())
                .with_policy(config.store.output_policy)
                .with_poll(config.readiness.poll_settings());
        let reader = SourceReader::new(
            store.clone(),
            &config.project,
            input,
            config.store.input_columns.clone(),
        );
        let enricher = RecordEnricher::new(generator);
        let writer = RetryingWriter::new(store, output, config.write.retry_policy());

        Self::new(readiness, reader, enricher, writer)
    }

    /// Run once. Per-record failures are reported in the result, not as an error.
    pub async fn run(&self) -> Result<PipelineRunResult, PipelineError> {
        let action = self.readiness.ensure_ready().await.context(ReadinessSnafu)?;
        let records = self.reader.fetch().await.context(FetchSnafu)?;
        info!(
            records = records.len(),
            output = %self.writer.table(),
            "Processing records"
        );

        let mut result = PipelineRunResult::new(action);
        for fetched in records {
            result.attempted += 1;
            match self.process(fetched).await {
                Ok(()) => {
                    result.succeeded += 1;
                    emit!(RecordProcessed {
                        status: RecordStatus::Success
                    });
                }
                Err(failure) => {
                    self.report_failure(&failure).await;
                    result.failed += 1;
                    result.failures.push(failure);
                }
            }
        }

        if let Some(dlq) = &self.dlq
            && let Err(e) = dlq.finalize().await
        {
            error!("Failed to finalize DLQ: {}", e);
        }

        Ok(result)
    }

    async fn process(&self, fetched: FetchedRecord) -> Result<(), RecordFailure> {
        let record = fetched.map_err(|source| RecordFailure {
            source_id: source.source_id().map(str::to_string),
            title: None,
            error: RecordError::InvalidRecord { source },
        })?;

        let outcome: Result<(), RecordError> = async {
            let analysis = self
                .enricher
                .enrich(&record)
                .await
                .context(GenerationSnafu)?;
            self.writer.write(&analysis).await.context(WriteSnafu)
        }
        .await;

        match outcome {
            Ok(()) => {
                info!(source_id = %record.source_id(), "Analysis saved");
                Ok(())
            }
            Err(error) => Err(RecordFailure::for_record(&record, error)),
        }
    }

    async fn report_failure(&self, failure: &RecordFailure) {
        let stage = failure.stage();
        let message = snafu::Report::from_error(&failure.error).to_string();

        emit!(RecordProcessed {
            status: RecordStatus::Failed
        });
        emit!(RecordFailed { stage });
        warn!(
            source_id = failure.source_id.as_deref().unwrap_or("-"),
            stage = stage.as_str(),
            error = %message,
            "Record failed"
        );

        if let Some(dlq) = &self.dlq {
            dlq.record_failure(
                failure.source_id.as_deref(),
                failure.title.as_deref(),
                stage,
                &message,
            )
            .await;
        }
    }
}

/// Run the pipeline once against BigQuery and Vertex AI.
pub async fn run_pipeline(config: Config) -> Result<PipelineRunResult, PipelineError> {
    let credentials = Arc::new(CredentialFile::new(&config.credentials));

    let store = BigQueryStore::new(
        BigQueryOptions {
            project: config.project.clone(),
            endpoint: config
                .store
                .endpoint
                .clone()
                .unwrap_or_else(|| gcp::BIGQUERY_ENDPOINT.to_string()),
            location: config.store.location.clone(),
            query_timeout: Duration::from_secs(config.store.query_timeout_secs),
            request_timeout: Duration::from_secs(config.store.request_timeout_secs),
        },
        credentials.clone(),
    )
    .context(BuildStoreSnafu)?;

    let generator = VertexGenerator::new(
        VertexOptions {
            project: config.project.clone(),
            location: config.model.location.clone(),
            model: config.model.name.clone(),
            endpoint: config.model.endpoint.clone(),
            request_timeout: Duration::from_secs(config.model.request_timeout_secs),
            temperature: config.model.temperature,
            max_output_tokens: config.model.max_output_tokens,
            candidate_count: config.model.candidate_count,
        },
        credentials.clone(),
    )
    .context(BuildGeneratorSnafu)?;

    let dlq = DeadLetterQueue::from_config(&config.error_handling)
        .await
        .context(DlqSnafu)?;

    PipelineRunner::from_config(&config, credentials, Arc::new(store), Arc::new(generator))
        .with_dlq(dlq)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, ReadinessError, WriteError};
    use crate::generate::{GenerationResponse, ScriptedGenerator};
    use crate::schema::{TableSchema, output_schema};
    use crate::store::{InsertFault, MemoryStore, Row, TableRef};
    use serde_json::{Value, json};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"
project: website-401719
store:
  dataset: db_informacion
  input_table: Info
  output_table: info_detalle
"#;

    fn config() -> Config {
        Config::from_yaml(CONFIG, false).unwrap()
    }

    fn credentials() -> (NamedTempFile, Arc<CredentialFile>) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"token").unwrap();
        let creds = Arc::new(CredentialFile::new(file.path()));
        (file, creds)
    }

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    fn input_rows(count: usize) -> Vec<Row> {
        (1..=count)
            .map(|i| row(json!({"Id": i, "Titulo": format!("t{i}"), "Comentario": "c"})))
            .collect()
    }

    fn store_with(rows: Vec<Row>) -> MemoryStore {
        MemoryStore::new().with_table(
            TableRef::new("db_informacion", "Info"),
            TableSchema::default(),
            rows,
        )
    }

    fn output() -> TableRef {
        TableRef::new("db_informacion", "info_detalle")
    }

    #[tokio::test]
    async fn test_failed_generation_is_isolated() {
        let (_file, creds) = credentials();
        let store = Arc::new(store_with(input_rows(4)));
        let generator = Arc::new(ScriptedGenerator::new(|index, _| {
            if index == 2 {
                Ok(GenerationResponse::empty())
            } else {
                Ok(GenerationResponse::from_candidates([format!("analysis {index}")]))
            }
        }));

        let result = PipelineRunner::from_config(&config(), creds, store.clone(), generator)
            .run()
            .await
            .unwrap();

        assert_eq!(result.attempted, 4);
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].source_id.as_deref(), Some("3"));
        assert_eq!(result.failures[0].stage(), FailureStage::Generate);
        assert!(matches!(
            result.failures[0].error,
            RecordError::Generation {
                source: GenerationError::EmptyResponse
            }
        ));

        let written: Vec<Value> = store
            .rows(&output())
            .into_iter()
            .map(|r| r["source_id"].clone())
            .collect();
        assert_eq!(written, vec![json!("1"), json!("2"), json!("4")]);
        assert_eq!(store.insert_attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_readiness_failure_processes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let creds = Arc::new(CredentialFile::new(dir.path().join("credentials.json")));
        let store = Arc::new(store_with(input_rows(2)));
        let generator = Arc::new(ScriptedGenerator::always("x"));

        let err = PipelineRunner::from_config(&config(), creds, store.clone(), generator.clone())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Readiness {
                source: ReadinessError::Configuration { .. }
            }
        ));
        assert_eq!(generator.calls(), 0);
        assert!(store.queries().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts() {
        let (_file, creds) = credentials();
        let store = Arc::new(store_with(input_rows(2)).with_query_failure("Access Denied"));
        let generator = Arc::new(ScriptedGenerator::always("x"));

        let err = PipelineRunner::from_config(&config(), creds, store, generator.clone())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Fetch { .. }));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_row_is_a_record_failure() {
        let (_file, creds) = credentials();
        let mut rows = input_rows(2);
        rows.insert(1, row(json!({"Id": null, "Titulo": "x", "Comentario": "y"})));
        let store = Arc::new(store_with(rows));
        let generator = Arc::new(ScriptedGenerator::always("ok"));

        let result = PipelineRunner::from_config(&config(), creds, store.clone(), generator.clone())
            .run()
            .await
            .unwrap();

        assert_eq!((result.attempted, result.succeeded, result.failed), (3, 2, 1));
        assert_eq!(result.failures[0].stage(), FailureStage::Source);
        assert!(result.failures[0].source_id.is_none());
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_recorded_in_dlq() {
        let (_file, creds) = credentials();
        let dlq_dir = tempfile::tempdir().unwrap();
        let rejected = || InsertFault::Rejected("backendError".to_string());
        let store = Arc::new(
            store_with(input_rows(1)).with_insert_faults([rejected(), rejected(), rejected()]),
        );
        let dlq = DeadLetterQueue::in_dir(dlq_dir.path()).await.unwrap();
        let dlq_path = dlq.path().to_path_buf();

        let result = PipelineRunner::from_config(
            &config(),
            creds,
            store.clone(),
            Arc::new(ScriptedGenerator::always("a")),
        )
        .with_dlq(Some(dlq))
        .run()
        .await
        .unwrap();

        assert_eq!(result.failed, 1);
        assert!(matches!(
            result.failures[0].error,
            RecordError::Write {
                source: WriteError::ExhaustedRetries { attempts: 3, .. }
            }
        ));
        assert!(store.rows(&output()).is_empty());
        assert_eq!(store.schema(&output()), Some(output_schema()));

        let content = std::fs::read_to_string(dlq_path).unwrap();
        let line: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(line["source_id"], "1");
        assert_eq!(line["title"], "t1");
        assert_eq!(line["stage"], "write");
    }
}

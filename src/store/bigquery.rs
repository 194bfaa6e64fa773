//! BigQuery REST (v2) implementation of [`TableStore`].

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::{DeleteOutcome, InsertRowError, Row, TableRef, TableStore};
use crate::emit;
use crate::error::{
    NotFoundSnafu, QueryTimeoutSnafu, StoreApiSnafu, StoreCredentialsSnafu, StoreEndpointSnafu,
    StoreError, StoreHttpSnafu, StoreResponseSnafu, StoreUnavailableSnafu,
};
use crate::gcp::{self, CredentialFile};
use crate::metrics::events::{RequestStatus, StoreOperation, StoreRequest, StoreRequestDuration};
use crate::schema::TableSchema;

/// Connection settings for [`BigQueryStore`].
#[derive(Debug, Clone)]
pub struct BigQueryOptions {
    pub project: String,
    /// API root, e.g. `https://bigquery.googleapis.com`.
    pub endpoint: String,
    /// Job location; `None` lets BigQuery infer it from the dataset.
    pub location: Option<String>,
    /// Upper bound on how long a query job may run.
    pub query_timeout: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

/// Store client backed by the BigQuery REST API.
pub struct BigQueryStore {
    client: Client,
    options: BigQueryOptions,
    credentials: Arc<CredentialFile>,
}

impl std::fmt::Debug for BigQueryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BigQueryStore<{}>", self.options.project)
    }
}

impl BigQueryStore {
    pub fn new(
        options: BigQueryOptions,
        credentials: Arc<CredentialFile>,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context(StoreHttpSnafu)?;
        Ok(Self {
            client,
            options,
            credentials,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut full = vec!["bigquery", "v2", "projects", self.options.project.as_str()];
        full.extend_from_slice(segments);
        gcp::build_url(&self.options.endpoint, &full).context(StoreEndpointSnafu)
    }

    fn table_url(&self, table: &TableRef, suffix: &[&str]) -> Result<Url, StoreError> {
        let mut segments = vec!["datasets", table.dataset.as_str(), "tables", table.table.as_str()];
        segments.extend_from_slice(suffix);
        self.url(&segments)
    }

    /// Send an authorized request, mapping non-success statuses to errors.
    async fn send(
        &self,
        operation: StoreOperation,
        request: RequestBuilder,
    ) -> Result<Response, StoreError> {
        let token = self
            .credentials
            .bearer_token()
            .await
            .context(StoreCredentialsSnafu)?;

        let start = Instant::now();
        let result = request.bearer_auth(token).send().await;
        emit!(StoreRequestDuration {
            operation,
            duration: start.elapsed(),
        });

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                emit!(StoreRequest {
                    operation,
                    status: RequestStatus::Error,
                });
                return Err(e).context(StoreHttpSnafu);
            }
        };

        if response.status().is_success() {
            emit!(StoreRequest {
                operation,
                status: RequestStatus::Success,
            });
            return Ok(response);
        }

        emit!(StoreRequest {
            operation,
            status: RequestStatus::Error,
        });
        let not_found = response.status() == StatusCode::NOT_FOUND;
        let (status, message) = gcp::error_details(response).await;
        if not_found {
            NotFoundSnafu { resource: message }.fail()
        } else {
            StoreApiSnafu { status, message }.fail()
        }
    }

    async fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
        wait: Duration,
    ) -> Result<QueryResponse, StoreError> {
        let mut url = self.url(&["queries", job.job_id.as_str()])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("timeoutMs", &wait.as_millis().to_string());
            if let Some(location) = job.location.as_deref() {
                pairs.append_pair("location", location);
            }
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        let response = self
            .send(StoreOperation::Query, self.client.request(Method::GET, url))
            .await?;
        response.json().await.context(StoreResponseSnafu)
    }
}

#[async_trait]
impl TableStore for BigQueryStore {
    async fn get_dataset(&self, dataset: &str) -> Result<(), StoreError> {
        let url = self.url(&["datasets", dataset])?;
        self.send(StoreOperation::GetDataset, self.client.get(url))
            .await?;
        Ok(())
    }

    async fn get_table(&self, table: &TableRef) -> Result<TableSchema, StoreError> {
        let url = self.table_url(table, &[])?;
        let response = self
            .send(StoreOperation::GetTable, self.client.get(url))
            .await?;
        let metadata: TableMetadata = response.json().await.context(StoreResponseSnafu)?;
        Ok(metadata.schema)
    }

    async fn delete_table(&self, table: &TableRef) -> Result<DeleteOutcome, StoreError> {
        let url = self.table_url(table, &[])?;
        match self
            .send(StoreOperation::DeleteTable, self.client.delete(url))
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<(), StoreError> {
        let url = self.url(&["datasets", table.dataset.as_str(), "tables"])?;
        let body = TableResource {
            table_reference: TableReference {
                project_id: &self.options.project,
                dataset_id: &table.dataset,
                table_id: &table.table,
            },
            schema,
        };
        self.send(
            StoreOperation::CreateTable,
            self.client.post(url).json(&body),
        )
        .await?;
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let started = Instant::now();
        let deadline = started + self.options.query_timeout;
        let url = self.url(&["queries"])?;
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            location: self.options.location.as_deref(),
            timeout_ms: wait_budget(deadline).as_millis() as u64,
        };

        let response = self
            .send(StoreOperation::Query, self.client.post(url).json(&request))
            .await?;
        let mut page: QueryResponse = response.json().await.context(StoreResponseSnafu)?;
        let job = page.job_reference.take();

        let mut schema: Option<TableSchema> = None;
        let mut rows = Vec::new();

        loop {
            if let Some(page_schema) = page.schema.take() {
                schema = Some(page_schema);
            }

            let mut page_token = None;
            if page.job_complete {
                if let Some(schema) = &schema {
                    rows.extend(page.rows.drain(..).map(|row| decode_row(schema, row)));
                }
                match page.page_token.take() {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            } else if Instant::now() >= deadline {
                return QueryTimeoutSnafu {
                    job_id: job.map(|j| j.job_id).unwrap_or_default(),
                    waited: started.elapsed(),
                }
                .fail();
            }

            let Some(job) = job.as_ref() else {
                return StoreUnavailableSnafu {
                    message: "query response carried no job reference",
                }
                .fail();
            };
            debug!(
                job_id = %job.job_id,
                complete = page.job_complete,
                rows = rows.len(),
                "Fetching query results"
            );
            page = self
                .get_query_results(job, page_token.as_deref(), wait_budget(deadline))
                .await?;
        }

        Ok(rows)
    }

    async fn insert_rows(
        &self,
        table: &TableRef,
        rows: &[Row],
    ) -> Result<Vec<InsertRowError>, StoreError> {
        let url = self.table_url(table, &["insertAll"])?;
        let body = InsertAllRequest {
            rows: rows.iter().map(|json| InsertRow { json }).collect(),
        };
        let response = self
            .send(
                StoreOperation::InsertRows,
                self.client.post(url).json(&body),
            )
            .await?;
        let result: InsertAllResponse = response.json().await.context(StoreResponseSnafu)?;
        Ok(flatten_insert_errors(result.insert_errors))
    }
}

/// Remaining time before `deadline`, floored at one second so polls still
/// make progress right at the edge.
fn wait_budget(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .max(Duration::from_secs(1))
}

/// Map a positional `f`/`v` row onto column names.
fn decode_row(schema: &TableSchema, row: TableRow) -> Row {
    schema
        .fields
        .iter()
        .zip(row.f)
        .map(|(field, cell)| (field.name.clone(), cell.v))
        .collect()
}

fn flatten_insert_errors(entries: Vec<InsertErrors>) -> Vec<InsertRowError> {
    entries
        .into_iter()
        .flat_map(|entry| {
            let index = entry.index;
            if entry.errors.is_empty() {
                return vec![InsertRowError::new(index, "unknown", "row rejected")];
            }
            entry
                .errors
                .into_iter()
                .map(|e| InsertRowError::new(index, e.reason, e.message))
                .collect()
        })
        .collect()
}

// ============ Wire types ============

#[derive(Deserialize)]
struct TableMetadata {
    #[serde(default)]
    schema: TableSchema,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableResource<'a> {
    table_reference: TableReference<'a>,
    schema: &'a TableSchema,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    timeout_ms: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
    job_reference: Option<JobReference>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Deserialize)]
struct Cell {
    #[serde(default)]
    v: Value,
}

#[derive(Serialize)]
struct InsertAllRequest<'a> {
    rows: Vec<InsertRow<'a>>,
}

#[derive(Serialize)]
struct InsertRow<'a> {
    json: &'a Row,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrors>,
}

#[derive(Deserialize)]
struct InsertErrors {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::output_schema;
    use serde_json::json;

    fn store() -> BigQueryStore {
        BigQueryStore::new(
            BigQueryOptions {
                project: "website-401719".to_string(),
                endpoint: gcp::BIGQUERY_ENDPOINT.to_string(),
                location: None,
                query_timeout: Duration::from_secs(60),
                request_timeout: Duration::from_secs(30),
            },
            Arc::new(CredentialFile::new("/nonexistent/credentials.json")),
        )
        .unwrap()
    }

    #[test]
    fn test_table_urls() {
        let store = store();
        let table = TableRef::new("db_informacion", "info_detalle");
        assert_eq!(
            store.table_url(&table, &["insertAll"]).unwrap().as_str(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/website-401719/datasets/db_informacion/tables/info_detalle/insertAll"
        );
    }

    #[test]
    fn test_decode_query_page() {
        let page: QueryResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "jobReference": {"projectId": "p", "jobId": "job_1", "location": "US"},
            "schema": {"fields": [
                {"name": "Id", "type": "INTEGER"},
                {"name": "Titulo", "type": "STRING"},
                {"name": "Comentario", "type": "STRING"}
            ]},
            "rows": [
                {"f": [{"v": "1"}, {"v": "Etiqueta borrosa"}, {"v": "No escanea en Japón"}]},
                {"f": [{"v": "2"}, {"v": "Tinta corrida"}, {"v": null}]}
            ],
            "totalRows": "2"
        }))
        .unwrap();

        let schema = page.schema.unwrap();
        let rows: Vec<Row> = page.rows.into_iter().map(|r| decode_row(&schema, r)).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Id"], json!("1"));
        assert_eq!(rows[0]["Comentario"], json!("No escanea en Japón"));
        assert_eq!(rows[1]["Comentario"], Value::Null);
        assert_eq!(page.job_reference.unwrap().job_id, "job_1");
    }

    #[test]
    fn test_incomplete_job_has_no_rows() {
        let page: QueryResponse = serde_json::from_value(json!({
            "jobComplete": false,
            "jobReference": {"projectId": "p", "jobId": "job_2"}
        }))
        .unwrap();
        assert!(!page.job_complete);
        assert!(page.rows.is_empty());
        assert!(page.schema.is_none());
    }

    #[test]
    fn test_insert_errors_are_flattened() {
        let response: InsertAllResponse = serde_json::from_value(json!({
            "kind": "bigquery#tableDataInsertAllResponse",
            "insertErrors": [
                {"index": 0, "errors": [
                    {"reason": "invalid", "location": "analysis", "message": "Missing required field"}
                ]},
                {"index": 1}
            ]
        }))
        .unwrap();
        let errors = flatten_insert_errors(response.insert_errors);
        assert_eq!(
            errors,
            vec![
                InsertRowError::new(0, "invalid", "Missing required field"),
                InsertRowError::new(1, "unknown", "row rejected"),
            ]
        );
    }

    #[test]
    fn test_accepted_insert_has_no_errors() {
        let response: InsertAllResponse =
            serde_json::from_value(json!({"kind": "bigquery#tableDataInsertAllResponse"}))
                .unwrap();
        assert!(flatten_insert_errors(response.insert_errors).is_empty());
    }

    #[test]
    fn test_create_table_body() {
        let schema = output_schema();
        let body = TableResource {
            table_reference: TableReference {
                project_id: "p",
                dataset_id: "d",
                table_id: "t",
            },
            schema: &schema,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["tableReference"]["tableId"], "t");
        assert_eq!(value["schema"]["fields"][2]["name"], "analysis");
        assert_eq!(value["schema"]["fields"][2]["mode"], "REQUIRED");
        assert_eq!(value["schema"]["fields"][2]["type"], "STRING");
        assert!(value["schema"]["fields"][2].get("maxLength").is_none());
    }

    #[test]
    fn test_query_request_body() {
        let request = QueryRequest {
            query: "SELECT 1",
            use_legacy_sql: false,
            location: None,
            timeout_ms: 10_000,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"query": "SELECT 1", "useLegacySql": false, "timeoutMs": 10000})
        );
    }
}

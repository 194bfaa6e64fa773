//! Error types for labelwise using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase. Fatal categories (configuration,
//! readiness, fetch) abort a run; per-record categories (generation, write,
//! invalid input rows) are collected into the run result.

use snafu::prelude::*;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::metrics::events::FailureStage;
use crate::store::InsertRowError;

// ============ Credentials Errors ============

/// Errors that can occur while loading the bearer token from the credential file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CredentialsError {
    /// Credential file does not exist.
    #[snafu(display("Credentials file not found at {}", path.display()))]
    CredentialsMissing { path: PathBuf },

    /// Credential file could not be read.
    #[snafu(display("Failed to read credentials file {}", path.display()))]
    CredentialsRead {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Credential file is empty.
    #[snafu(display("Credentials file {} is empty", path.display()))]
    CredentialsEmpty { path: PathBuf },

    /// Credential file looks like JSON but does not parse.
    #[snafu(display("Credentials file {} is not valid JSON", path.display()))]
    CredentialsJson {
        source: serde_json::Error,
        path: PathBuf,
    },

    /// JSON credential file has no usable `access_token` field.
    #[snafu(display("Credentials file {} has no access_token field", path.display()))]
    MissingAccessToken { path: PathBuf },
}

// ============ Store Errors ============

/// Errors raised by a tabular store client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// HTTP request to the store failed before a response arrived.
    #[snafu(display("Store request failed"))]
    StoreHttp { source: reqwest::Error },

    /// Response body could not be decoded.
    #[snafu(display("Failed to decode store response"))]
    StoreResponse { source: reqwest::Error },

    /// The store answered with a non-success status.
    #[snafu(display("Store returned HTTP {status}: {message}"))]
    StoreApi { status: u16, message: String },

    /// The addressed dataset or table does not exist.
    #[snafu(display("Resource not found: {resource}"))]
    NotFound { resource: String },

    /// Could not obtain a bearer token.
    #[snafu(display("Store credentials unavailable"))]
    StoreCredentials { source: CredentialsError },

    /// Could not build a request URL from the configured endpoint.
    #[snafu(display("Invalid store endpoint"))]
    StoreEndpoint { source: url::ParseError },

    /// A query job did not complete in time.
    #[snafu(display("Query job {job_id} did not complete within {waited:?}"))]
    QueryTimeout { job_id: String, waited: Duration },

    /// Store is unreachable (transport failure without an HTTP status).
    #[snafu(display("Store unavailable: {message}"))]
    StoreUnavailable { message: String },
}

impl StoreError {
    /// Check if this error represents a "not found" condition (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

// ============ Generative Service Errors ============

/// Errors raised by a generative text service client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GenerateError {
    /// HTTP request to the model endpoint failed.
    #[snafu(display("Generation request failed"))]
    GenerateHttp { source: reqwest::Error },

    /// Response body could not be decoded.
    #[snafu(display("Failed to decode generation response"))]
    GenerateResponse { source: reqwest::Error },

    /// The service answered with a non-success status.
    #[snafu(display("Model endpoint returned HTTP {status}: {message}"))]
    GenerateApi { status: u16, message: String },

    /// Could not obtain a bearer token.
    #[snafu(display("Model credentials unavailable"))]
    GenerateCredentials { source: CredentialsError },

    /// Could not build a request URL from the configured endpoint.
    #[snafu(display("Invalid model endpoint"))]
    GenerateEndpoint { source: url::ParseError },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Project id is empty.
    #[snafu(display("Project cannot be empty"))]
    EmptyProject,

    /// A dataset or table name is empty.
    #[snafu(display("{field} cannot be empty"))]
    EmptyName { field: &'static str },

    /// Identifier contains characters that cannot be used unquoted in a table path.
    #[snafu(display("Invalid identifier for {field}: {value:?}"))]
    InvalidIdentifier { field: &'static str, value: String },

    /// Input and output point at the same table.
    #[snafu(display("Input and output table must differ (both are {table})"))]
    SameInputOutputTable { table: String },

    /// Model name is empty.
    #[snafu(display("Model name cannot be empty"))]
    EmptyModelName,

    /// Writer needs at least one attempt.
    #[snafu(display("write.max_attempts must be at least 1"))]
    InvalidMaxAttempts,

    /// Endpoint override is not a valid URL.
    #[snafu(display("Invalid endpoint URL {endpoint:?}"))]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Readiness Errors ============

/// Which pre-existing resource a readiness check was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// The dataset that holds both tables.
    Namespace,
    /// The table records are read from.
    Input,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Namespace => f.write_str("Dataset"),
            ResourceKind::Input => f.write_str("Input table"),
        }
    }
}

/// Errors that abort a run during the readiness phase.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReadinessError {
    /// The credential artifact is missing; no network call was made.
    #[snafu(display("Credentials file not found at {}", path.display()))]
    Configuration { path: PathBuf },

    /// Dataset or input table is absent or unreachable.
    #[snafu(display("{kind} '{name}' not found or not accessible"))]
    ResourceNotFound {
        kind: ResourceKind,
        name: String,
        source: StoreError,
    },

    /// Output table could not be dropped or created.
    #[snafu(display("Failed to recreate output table '{table}'"))]
    ResourceCreation { table: String, source: StoreError },

    /// Output table was created but never became queryable.
    #[snafu(display("Output table '{table}' not queryable after {waited:?}"))]
    CreationTimeout { table: String, waited: Duration },
}

// ============ Per-record Errors ============

/// Failure to produce an analysis for one record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GenerationError {
    /// The model returned neither candidates nor text.
    #[snafu(display("Model returned an empty response"))]
    EmptyResponse,

    /// The model call itself failed.
    #[snafu(display("Model call failed"))]
    ServiceFailure { source: GenerateError },
}

/// Failure to commit one analysis row.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// Every attempt was rejected by the store.
    #[snafu(display(
        "Insert rejected after {attempts} attempts: {}",
        InsertRowError::summarize(last_errors)
    ))]
    ExhaustedRetries {
        attempts: u32,
        last_errors: Vec<InsertRowError>,
    },

    /// The final attempt failed in transport.
    #[snafu(display("Insert failed in transport after {attempts} attempts"))]
    Transport { attempts: u32, source: StoreError },
}

/// A source row that cannot be turned into a record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Row lacks a configured column.
    #[snafu(display("Row has no column '{column}'"))]
    MissingColumn { column: String },

    /// Id column is null.
    #[snafu(display("Row has a null id in column '{column}'"))]
    NullId { column: String },

    /// Title or comment is not a string.
    #[snafu(display("Column '{column}' of record {source_id} is not a string"))]
    InvalidField { column: String, source_id: String },
}

impl SourceError {
    /// Id of the offending row, when it could be read.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            SourceError::InvalidField { source_id, .. } => Some(source_id),
            _ => None,
        }
    }
}

/// Cause of a single record failing, retained in the run result.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RecordError {
    /// Row could not be mapped into a record.
    #[snafu(display("Invalid source row"))]
    InvalidRecord { source: SourceError },

    /// Generation failed.
    #[snafu(display("Generation failed"))]
    Generation { source: GenerationError },

    /// Write failed.
    #[snafu(display("Write failed"))]
    Write { source: WriteError },
}

impl RecordError {
    /// Pipeline stage the failure belongs to.
    pub fn stage(&self) -> FailureStage {
        match self {
            RecordError::InvalidRecord { .. } => FailureStage::Source,
            RecordError::Generation { .. } => FailureStage::Generate,
            RecordError::Write { .. } => FailureStage::Write,
        }
    }
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ DLQ Errors ============

/// Errors that can occur during Dead Letter Queue operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix is intentional to avoid snafu selector conflicts
#[allow(clippy::enum_variant_names)]
pub enum DlqError {
    /// Failed to create or append to the DLQ file.
    #[snafu(display("Failed to write DLQ file {}", path.display()))]
    DlqIo {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to serialize failed record.
    #[snafu(display("Failed to serialize DLQ record"))]
    DlqSerialize { source: serde_json::Error },
}

// ============ Pipeline Error (top-level) ============

/// Top-level errors that abort a run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Resources are not ready; nothing was processed.
    #[snafu(display("Readiness check failed"))]
    Readiness { source: ReadinessError },

    /// Input table could not be read.
    #[snafu(display("Failed to fetch source records"))]
    Fetch { source: StoreError },

    /// Store client could not be constructed.
    #[snafu(display("Failed to build store client"))]
    BuildStore { source: StoreError },

    /// Model client could not be constructed.
    #[snafu(display("Failed to build model client"))]
    BuildGenerator { source: GenerateError },

    /// DLQ error.
    #[snafu(display("DLQ error"))]
    Dlq { source: DlqError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}

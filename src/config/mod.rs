//! Configuration parsing and validation.
//!
//! Loads a YAML file, interpolates environment variables, and checks the
//! result before any client is built.

mod vars;

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyModelNameSnafu, EmptyNameSnafu, EmptyProjectSnafu, EnvInterpolationSnafu,
    InvalidEndpointSnafu, InvalidIdentifierSnafu, InvalidMaxAttemptsSnafu, ReadFileSnafu,
    SameInputOutputTableSnafu, YamlParseSnafu,
};
use crate::readiness::{OutputPolicy, PollSettings};
use crate::sink::RetryPolicy;
use crate::store::TableRef;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid regex pattern"));

/// Main configuration structure for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Google Cloud project that owns the dataset and the model quota.
    pub project: String,
    /// File holding the bearer token (default: `credentials.json`).
    #[serde(default = "default_credentials")]
    pub credentials: PathBuf,
    pub store: StoreConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub write: WriteConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Error handling configuration (optional).
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
}

fn default_credentials() -> PathBuf {
    PathBuf::from("credentials.json")
}

/// Tabular store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Dataset holding both tables.
    pub dataset: String,
    pub input_table: String,
    pub output_table: String,
    /// Job location, e.g. `US`. Inferred from the dataset when unset.
    #[serde(default)]
    pub location: Option<String>,
    /// API root override, e.g. for an emulator.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub input_columns: InputColumns,
    /// What to do with an existing output table (default: replace).
    #[serde(default)]
    pub output_policy: OutputPolicy,
    /// Upper bound on the input query (default: 300).
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Per-request HTTP timeout (default: 60).
    #[serde(default = "default_store_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_query_timeout_secs() -> u64 {
    300
}

fn default_store_request_timeout_secs() -> u64 {
    60
}

impl StoreConfig {
    pub fn input(&self) -> TableRef {
        TableRef::new(&self.dataset, &self.input_table)
    }

    pub fn output(&self) -> TableRef {
        TableRef::new(&self.dataset, &self.output_table)
    }
}

/// Column names of the input table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputColumns {
    #[serde(default = "default_id_column")]
    pub id: String,
    #[serde(default = "default_title_column")]
    pub title: String,
    #[serde(default = "default_comment_column")]
    pub comment: String,
}

impl Default for InputColumns {
    fn default() -> Self {
        Self {
            id: default_id_column(),
            title: default_title_column(),
            comment: default_comment_column(),
        }
    }
}

fn default_id_column() -> String {
    "Id".to_string()
}

fn default_title_column() -> String {
    "Titulo".to_string()
}

fn default_comment_column() -> String {
    "Comentario".to_string()
}

/// Generative model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Publisher model id (default: `gemini-pro`).
    #[serde(default = "default_model_name")]
    pub name: String,
    /// Vertex AI region (default: `us-central1`).
    #[serde(default = "default_model_location")]
    pub location: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-request HTTP timeout (default: 120).
    #[serde(default = "default_model_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub candidate_count: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            location: default_model_location(),
            endpoint: None,
            request_timeout_secs: default_model_request_timeout_secs(),
            temperature: None,
            max_output_tokens: None,
            candidate_count: None,
        }
    }
}

fn default_model_name() -> String {
    "gemini-pro".to_string()
}

fn default_model_location() -> String {
    "us-central1".to_string()
}

fn default_model_request_timeout_secs() -> u64 {
    120
}

/// Insert retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Attempts per row, first one included (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt, doubled each time (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl WriteConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// Output table polling after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Delay between polls (default: 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up after this long (default: 30).
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_timeout_secs() -> u64 {
    30
}

impl ReadinessConfig {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is served (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// Error handling configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Directory for failed record files. Disabled when unset.
    #[serde(default)]
    pub dlq_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            vars::interpolate(content).map_err(|errors| {
                let message = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n");
                EnvInterpolationSnafu { message }.build()
            })?
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.project.trim().is_empty(), EmptyProjectSnafu);
        check_identifier("project", &self.project)?;
        check_identifier("store.dataset", &self.store.dataset)?;
        check_identifier("store.input_table", &self.store.input_table)?;
        check_identifier("store.output_table", &self.store.output_table)?;
        ensure!(
            self.store.input_table != self.store.output_table,
            SameInputOutputTableSnafu {
                table: self.store.output().to_string()
            }
        );

        let columns = &self.store.input_columns;
        check_identifier("store.input_columns.id", &columns.id)?;
        check_identifier("store.input_columns.title", &columns.title)?;
        check_identifier("store.input_columns.comment", &columns.comment)?;

        ensure!(!self.model.name.trim().is_empty(), EmptyModelNameSnafu);
        check_identifier("model.location", &self.model.location)?;
        ensure!(self.write.max_attempts >= 1, InvalidMaxAttemptsSnafu);

        for endpoint in [&self.store.endpoint, &self.model.endpoint]
            .into_iter()
            .flatten()
        {
            url::Url::parse(endpoint).context(InvalidEndpointSnafu { endpoint })?;
        }
        Ok(())
    }
}

fn check_identifier(field: &'static str, value: &str) -> Result<(), ConfigError> {
    ensure!(!value.is_empty(), EmptyNameSnafu { field });
    ensure!(
        IDENTIFIER.is_match(value),
        InvalidIdentifierSnafu { field, value }
    );
    Ok(())
}

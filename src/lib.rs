//! labelwise: generated root-cause analyses for product-labeling reports.
//!
//! Reads labeling defect reports (title and comment) from a BigQuery table,
//! asks a Vertex AI model for a diagnostic analysis of each, and writes the
//! analyses to an output table keyed by the source id.
//!
//! # Example
//!
//! ```ignore
//! use labelwise::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let result = run_pipeline(config).await?;
//!     println!("{} of {} records analysed", result.succeeded, result.attempted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dlq;
pub mod enrich;
pub mod error;
pub mod gcp;
pub mod generate;
pub mod metrics;
pub mod pipeline;
pub mod readiness;
pub mod schema;
pub mod sink;
pub mod source;
pub mod store;

// Re-export main types
pub use config::Config;
pub use pipeline::{PipelineRunResult, PipelineRunner, RecordFailure, run_pipeline};
pub use store::{TableStore, TableStoreRef};

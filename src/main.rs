//! labelwise: one-shot enrichment of labeling reports with generated analyses.
//!
//! Verifies the BigQuery resources, reads every report from the input table,
//! asks the model for an analysis of each, and writes the results.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use labelwise::config::Config;
use labelwise::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use labelwise::{metrics, run_pipeline};

/// Generate root-cause analyses for labeling reports.
#[derive(Parser, Debug)]
#[command(name = "labelwise")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("labelwise starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        print_config(&config);
        return Ok(());
    }

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let result = run_pipeline(config).await?;

    info!("Run completed");
    info!("  Output table: {}", result.output_action);
    info!("  Records attempted: {}", result.attempted);
    info!("  Records succeeded: {}", result.succeeded);
    info!("  Records failed: {}", result.failed);
    for failure in &result.failures {
        warn!(
            "  - {} [{}]: {}",
            failure.source_id.as_deref().unwrap_or("<no id>"),
            failure.stage().as_str(),
            snafu::Report::from_error(&failure.error)
        );
    }

    Ok(())
}

fn print_config(config: &Config) {
    info!("Dry run mode - validating configuration");
    info!("Project: {}", config.project);
    info!("Credentials: {}", config.credentials.display());
    info!("Input: {}", config.store.input());
    info!("Output: {} ({:?})", config.store.output(), config.store.output_policy);
    info!(
        "Columns: id={}, title={}, comment={}",
        config.store.input_columns.id,
        config.store.input_columns.title,
        config.store.input_columns.comment
    );
    info!("Model: {} in {}", config.model.name, config.model.location);
    info!(
        "Writes: {} attempts, base delay {}ms",
        config.write.max_attempts, config.write.base_delay_ms
    );
    if let Some(dlq) = &config.error_handling.dlq_path {
        info!("DLQ: {}", dlq.display());
    }
    info!("Configuration is valid");
}

//! Dead Letter Queue for failed records.
//!
//! Records per-record failures to a local directory for later inspection
//! and reprocessing. Writes failures as NDJSON for easy parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::ErrorHandlingConfig;
use crate::error::{DlqError, DlqIoSnafu, DlqSerializeSnafu};
use crate::metrics::events::FailureStage;

/// Records buffered before an automatic flush.
const BUFFER_SIZE: usize = 100;

/// A record that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    /// Source id, when the row got far enough to have one.
    pub source_id: Option<String>,
    pub title: Option<String>,
    /// Stage at which the failure occurred.
    pub stage: FailureStage,
    /// Error message, including its causes.
    pub error: String,
    /// Timestamp when the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Statistics about failures by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureStats {
    pub source: usize,
    pub generate: usize,
    pub write: usize,
}

impl FailureStats {
    /// Increment the count for a specific stage.
    pub fn increment(&mut self, stage: FailureStage) {
        match stage {
            FailureStage::Source => self.source += 1,
            FailureStage::Generate => self.generate += 1,
            FailureStage::Write => self.write += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.source + self.generate + self.write
    }
}

/// Dead Letter Queue for recording failed records.
///
/// Each run appends to its own `failures-<timestamp>.ndjson` file.
pub struct DeadLetterQueue {
    path: PathBuf,
    buffer: Mutex<Vec<FailedRecord>>,
    stats: Mutex<FailureStats>,
}

impl DeadLetterQueue {
    /// Create a new DLQ from configuration.
    ///
    /// Returns `None` if no DLQ path is configured.
    pub async fn from_config(config: &ErrorHandlingConfig) -> Result<Option<Self>, DlqError> {
        let Some(dir) = &config.dlq_path else {
            return Ok(None);
        };
        Self::in_dir(dir).await.map(Some)
    }

    /// Create a DLQ writing into `dir`, creating the directory if needed.
    pub async fn in_dir(dir: &Path) -> Result<Self, DlqError> {
        tokio::fs::create_dir_all(dir)
            .await
            .context(DlqIoSnafu { path: dir })?;

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("failures-{timestamp}.ndjson"));

        info!(path = %path.display(), "DLQ enabled");

        Ok(Self {
            path,
            buffer: Mutex::new(Vec::new()),
            stats: Mutex::new(FailureStats::default()),
        })
    }

    /// File this run's failures are written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a record failure.
    pub async fn record_failure(
        &self,
        source_id: Option<&str>,
        title: Option<&str>,
        stage: FailureStage,
        error: &str,
    ) {
        let failed = FailedRecord {
            source_id: source_id.map(str::to_string),
            title: title.map(str::to_string),
            stage,
            error: error.to_string(),
            timestamp: Utc::now(),
        };

        debug!(
            source_id = source_id.unwrap_or("-"),
            stage = stage.as_str(),
            "Recording DLQ failure"
        );

        self.stats.lock().await.increment(stage);

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(failed);
            buffer.len() >= BUFFER_SIZE
        };

        if should_flush && let Err(e) = self.flush().await {
            error!("Failed to flush DLQ: {}", e);
        }
    }

    /// Append buffered records to the DLQ file.
    pub async fn flush(&self) -> Result<(), DlqError> {
        let records = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let count = records.len();
        debug!("Flushing {} DLQ records", count);

        let mut ndjson = String::new();
        for record in &records {
            let line = serde_json::to_string(record).context(DlqSerializeSnafu)?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context(DlqIoSnafu { path: &self.path })?;
        file.write_all(ndjson.as_bytes())
            .await
            .context(DlqIoSnafu { path: &self.path })?;
        file.flush()
            .await
            .context(DlqIoSnafu { path: &self.path })?;

        info!("Flushed {} records to DLQ", count);
        Ok(())
    }

    pub async fn get_stats(&self) -> FailureStats {
        self.stats.lock().await.clone()
    }

    /// Finalize the DLQ, flushing any remaining records.
    pub async fn finalize(&self) -> Result<FailureStats, DlqError> {
        self.flush().await?;
        let stats = self.get_stats().await;
        info!(
            "DLQ finalized: {} total failures (source={}, generate={}, write={})",
            stats.total(),
            stats.source,
            stats.generate,
            stats.write
        );
        Ok(stats)
    }
}

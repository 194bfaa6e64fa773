//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a run.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Store requests
// ============================================================================

/// Store operation label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    GetDataset,
    GetTable,
    DeleteTable,
    CreateTable,
    Query,
    InsertRows,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::GetDataset => "get_dataset",
            StoreOperation::GetTable => "get_table",
            StoreOperation::DeleteTable => "delete_table",
            StoreOperation::CreateTable => "create_table",
            StoreOperation::Query => "query",
            StoreOperation::InsertRows => "insert_rows",
        }
    }
}

/// Outcome label for a remote request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a store request completes.
pub struct StoreRequest {
    pub operation: StoreOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StoreRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Store request"
        );
        counter!(
            "labelwise_store_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the latency of a store request.
pub struct StoreRequestDuration {
    pub operation: StoreOperation,
    pub duration: Duration,
}

impl InternalEvent for StoreRequestDuration {
    fn emit(self) {
        histogram!(
            "labelwise_store_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Event emitted when a model call completes.
pub struct GenerationCompleted {
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for GenerationCompleted {
    fn emit(self) {
        trace!(
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Generation completed"
        );
        counter!("labelwise_generation_requests_total", "status" => self.status.as_str())
            .increment(1);
        histogram!("labelwise_generation_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Records
// ============================================================================

/// Event emitted when the input table has been read.
pub struct RecordsFetched {
    pub count: u64,
}

impl InternalEvent for RecordsFetched {
    fn emit(self) {
        trace!(count = self.count, "Records fetched");
        counter!("labelwise_records_fetched_total").increment(self.count);
    }
}

/// Status of a processed record.
#[derive(Debug, Clone, Copy)]
pub enum RecordStatus {
    Success,
    Failed,
}

impl RecordStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Failed => "failed",
        }
    }
}

/// Event emitted once per record, whatever the outcome.
pub struct RecordProcessed {
    pub status: RecordStatus,
}

impl InternalEvent for RecordProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Record processed");
        counter!("labelwise_records_processed_total", "status" => self.status.as_str())
            .increment(1);
    }
}

/// Stage at which a record failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Source,
    Generate,
    Write,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Source => "source",
            FailureStage::Generate => "generate",
            FailureStage::Write => "write",
        }
    }
}

/// Event emitted when a record fails.
pub struct RecordFailed {
    pub stage: FailureStage,
}

impl InternalEvent for RecordFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "Record failed");
        counter!("labelwise_records_failed_total", "stage" => self.stage.as_str()).increment(1);
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Outcome of one insert attempt.
#[derive(Debug, Clone, Copy)]
pub enum InsertOutcome {
    Accepted,
    Rejected,
    Transport,
}

impl InsertOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            InsertOutcome::Accepted => "accepted",
            InsertOutcome::Rejected => "rejected",
            InsertOutcome::Transport => "transport",
        }
    }
}

/// Event emitted for every insert attempt, retries included.
pub struct InsertAttempted {
    pub outcome: InsertOutcome,
}

impl InternalEvent for InsertAttempted {
    fn emit(self) {
        trace!(outcome = self.outcome.as_str(), "Insert attempted");
        counter!("labelwise_insert_attempts_total", "outcome" => self.outcome.as_str())
            .increment(1);
    }
}

// ============================================================================
// Readiness
// ============================================================================

/// Event emitted when the output table has been reconciled.
pub struct OutputTableReconciled {
    pub action: &'static str,
}

impl InternalEvent for OutputTableReconciled {
    fn emit(self) {
        trace!(action = self.action, "Output table reconciled");
        counter!("labelwise_output_table_reconciled_total", "action" => self.action).increment(1);
    }
}

/// Event emitted when the readiness phase finishes successfully.
pub struct ReadinessCompleted {
    pub duration: Duration,
}

impl InternalEvent for ReadinessCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "Readiness check completed"
        );
        histogram!("labelwise_readiness_duration_seconds").record(self.duration.as_secs_f64());
    }
}

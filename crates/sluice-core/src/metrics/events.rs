//! Internal events for sluice metrics emission.
//!
//! Each struct represents a measurable occurrence during a migration. Events
//! implement [`InternalEvent`], which records the matching Prometheus metric.
//! Per-table metrics carry a `table` label.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted once the source shards have been listed.
pub struct ShardsListed {
    pub count: u64,
}

impl InternalEvent for ShardsListed {
    fn emit(self) {
        trace!(count = self.count, "Shards listed");
        gauge!("sluice_shards_total").set(self.count as f64);
    }
}

/// Outcome of processing one shard.
#[derive(Debug, Clone, Copy)]
pub enum ShardStatus {
    Success,
    Skipped,
}

impl ShardStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ShardStatus::Success => "success",
            ShardStatus::Skipped => "skipped",
        }
    }
}

/// Event emitted when a shard has been fully read.
pub struct ShardProcessed {
    pub status: ShardStatus,
}

impl InternalEvent for ShardProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Shard processed");
        counter!("sluice_shards_processed_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted when compressed bytes are fetched from the source.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("sluice_bytes_read_total").increment(self.bytes);
    }
}

/// Event emitted when a shard finishes decompressing.
pub struct ShardDecompressionCompleted {
    pub duration: Duration,
}

impl InternalEvent for ShardDecompressionCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "Shard decompression completed");
        histogram!("sluice_shard_decompression_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted for records parsed out of a shard.
pub struct RecordsRead {
    pub count: u64,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(count = self.count, "Records read");
        counter!("sluice_records_read_total").increment(self.count);
    }
}

/// Event emitted when a record is accepted by a table sink.
pub struct RecordsWritten {
    pub count: u64,
    pub table: String,
}

impl InternalEvent for RecordsWritten {
    fn emit(self) {
        trace!(count = self.count, table = %self.table, "Records written");
        counter!("sluice_records_written_total", "table" => self.table).increment(self.count);
    }
}

/// Event emitted when a record is dropped before reaching a sink.
pub struct RecordsSkipped {
    pub count: u64,
    pub reason: &'static str,
}

impl InternalEvent for RecordsSkipped {
    fn emit(self) {
        trace!(count = self.count, reason = self.reason, "Records skipped");
        counter!("sluice_records_skipped_total", "reason" => self.reason).increment(self.count);
    }
}

/// Event emitted when a write had to wait for sink capacity.
pub struct SinkBackpressure {
    pub table: String,
    pub waited: Duration,
}

impl InternalEvent for SinkBackpressure {
    fn emit(self) {
        trace!(table = %self.table, waited_ms = self.waited.as_millis(), "Sink backpressure");
        counter!("sluice_sink_backpressure_total", "table" => self.table.clone()).increment(1);
        histogram!("sluice_sink_backpressure_wait_seconds", "table" => self.table)
            .record(self.waited.as_secs_f64());
    }
}

/// Event emitted when a load stream is opened for a table.
pub struct SinkOpened {
    pub table: String,
}

impl InternalEvent for SinkOpened {
    fn emit(self) {
        trace!(table = %self.table, "Sink opened");
        counter!("sluice_sinks_opened_total", "table" => self.table).increment(1);
    }
}

/// Event emitted when a load job completes successfully.
pub struct LoadJobCompleted {
    pub table: String,
    pub rows: u64,
    pub bad_records: u64,
    pub duration: Duration,
}

impl InternalEvent for LoadJobCompleted {
    fn emit(self) {
        trace!(
            table = %self.table,
            rows = self.rows,
            bad_records = self.bad_records,
            duration_ms = self.duration.as_millis(),
            "Load job completed"
        );
        counter!("sluice_load_jobs_total", "table" => self.table.clone(), "status" => "success")
            .increment(1);
        counter!("sluice_rows_loaded_total", "table" => self.table.clone()).increment(self.rows);
        counter!("sluice_bad_records_total", "table" => self.table.clone())
            .increment(self.bad_records);
        histogram!("sluice_load_job_duration_seconds", "table" => self.table)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a load job fails.
pub struct LoadJobFailed {
    pub table: String,
}

impl InternalEvent for LoadJobFailed {
    fn emit(self) {
        trace!(table = %self.table, "Load job failed");
        counter!("sluice_load_jobs_total", "table" => self.table, "status" => "failed").increment(1);
    }
}

/// Event emitted when a batch window has closed all of its sinks.
pub struct BatchWindowClosed {
    pub sinks: u64,
    pub duration: Duration,
}

impl InternalEvent for BatchWindowClosed {
    fn emit(self) {
        trace!(sinks = self.sinks, duration_ms = self.duration.as_millis(), "Batch window closed");
        counter!("sluice_batch_windows_total").increment(1);
        histogram!("sluice_batch_window_close_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Storage operation type.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    List,
    Get,
    Put,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::List => "list",
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
        }
    }
}

/// Outcome of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted for every storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "sluice_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!("sluice_storage_request_duration_seconds", "operation" => self.operation.as_str())
            .record(self.duration.as_secs_f64());
    }
}

//! The warehouse seam.
//!
//! Opening a load stream starts a load job in the background. Rows are pushed
//! through a bounded channel; dropping the sender ends the stream, after which
//! the job resolves with its statistics or an error.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SinkError;
use crate::schema::ColumnSchema;

/// Load job options. Every option defaults to enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadOptions {
    /// Create the table if it does not exist.
    #[serde(default = "enabled")]
    pub create_if_missing: bool,
    /// Append to existing rows rather than replacing them.
    #[serde(default = "enabled")]
    pub append_only: bool,
    /// Ignore values that do not match a column.
    #[serde(default = "enabled")]
    pub ignore_unknown_fields: bool,
    /// Allow the load to add columns.
    #[serde(default = "enabled")]
    pub allow_field_addition: bool,
    /// Allow the load to relax REQUIRED columns to NULLABLE.
    #[serde(default = "enabled")]
    pub allow_field_relaxation: bool,
}

fn enabled() -> bool {
    true
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            append_only: true,
            ignore_unknown_fields: true,
            allow_field_addition: true,
            allow_field_relaxation: true,
        }
    }
}

/// Everything needed to open a load stream for one table.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub table: String,
    /// Schema of the first row; later growth arrives as [`LoadChunk::Schema`].
    pub schema: Vec<ColumnSchema>,
    pub options: LoadOptions,
    /// Rows buffered before writers have to wait.
    pub capacity: usize,
    /// Batch window the job belongs to.
    pub window: usize,
}

/// A unit pushed through a load stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadChunk {
    /// One newline-terminated JSON row.
    Row(Bytes),
    /// The table schema grew; covers every row sent so far and after.
    Schema(Vec<ColumnSchema>),
    /// Rows the writer rejected before sending.
    BadRecords(u64),
}

/// Outcome of a finished load job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadJobStats {
    pub job_id: String,
    pub output_rows: u64,
    pub bad_records: u64,
}

/// A running load job.
pub struct LoadJob {
    id: String,
    table: String,
    handle: JoinHandle<Result<LoadJobStats, SinkError>>,
}

impl LoadJob {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<LoadJobStats, SinkError> {
        match self.handle.await {
            Ok(result) => result,
            Err(source) => Err(SinkError::JobLost {
                table: self.table,
                source,
            }),
        }
    }
}

/// An open load stream: the row sender plus the job consuming it.
pub struct LoadStream {
    pub sender: mpsc::Sender<LoadChunk>,
    pub job: LoadJob,
}

impl LoadStream {
    /// Spawn `run` as the job consuming a new bounded stream.
    pub fn spawn<F, Fut>(job_id: impl Into<String>, request: &LoadRequest, run: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<LoadChunk>) -> Fut,
        Fut: Future<Output = Result<LoadJobStats, SinkError>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(request.capacity.max(1));
        let handle = tokio::spawn(run(receiver));

        Self {
            sender,
            job: LoadJob {
                id: job_id.into(),
                table: request.table.clone(),
                handle,
            },
        }
    }
}

/// A destination that accepts per-table load streams.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Open a load stream and start its job.
    async fn open_load_stream(&self, request: LoadRequest) -> Result<LoadStream, SinkError>;
}

//! One table's load stream within a batch window.
//!
//! State machine:
//!
//! ```text
//! Open ──end()──▶ Draining ──complete()──▶ Completed | Failed
//!   └──────────── stream failure ─────────▶ Failed
//! ```
//!
//! A sink whose stream could not be opened starts out `Failed`; rows routed to
//! it for the rest of the window are counted as dropped.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};

use sluice_core::emit;
use sluice_core::metrics::events::SinkBackpressure;

use super::traits::{LoadChunk, LoadJob, LoadJobStats, LoadRequest, LoadStream, Warehouse};
use crate::error::SinkError;
use crate::record::Normalized;
use crate::schema::{ColumnSchema, merge_fields};

/// Lifecycle state of a [`TableSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Accepting rows.
    Open,
    /// Ended; waiting for the load job.
    Draining,
    /// The load job finished.
    Completed,
    /// The stream or its load job failed.
    Failed,
}

/// What happened to a row handed to [`TableSink::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Buffered without waiting.
    Accepted,
    /// Buffered after waiting for the job to drain the stream.
    Backpressured,
    /// Its schema conflicts with the table's; counted as a bad record.
    Rejected,
    /// The sink has failed; the row was not sent.
    Dropped,
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Accepted | WriteOutcome::Backpressured)
    }
}

/// Final accounting of a sink once its job has resolved.
#[derive(Debug)]
pub struct SinkReport {
    pub table: String,
    pub state: SinkState,
    pub rows_written: u64,
    pub rows_rejected: u64,
    pub rows_dropped: u64,
    pub outcome: Result<LoadJobStats, SinkError>,
    pub duration: Duration,
}

/// An open load stream for one table plus the table's evolving schema.
pub struct TableSink {
    table: String,
    state: SinkState,
    schema: Vec<ColumnSchema>,
    sender: Option<mpsc::Sender<LoadChunk>>,
    job: Option<LoadJob>,
    error: Option<SinkError>,
    rows_written: u64,
    rows_rejected: u64,
    rows_dropped: u64,
    opened_at: Instant,
}

impl TableSink {
    /// Open a load stream for `request.table`.
    pub async fn open(warehouse: &dyn Warehouse, request: LoadRequest) -> Result<Self, SinkError> {
        let table = request.table.clone();
        let schema = request.schema.clone();
        let LoadStream { sender, job } = warehouse.open_load_stream(request).await?;

        Ok(Self {
            table,
            state: SinkState::Open,
            schema,
            sender: Some(sender),
            job: Some(job),
            error: None,
            rows_written: 0,
            rows_rejected: 0,
            rows_dropped: 0,
            opened_at: Instant::now(),
        })
    }

    /// A sink whose stream failed to open.
    pub fn failed(table: impl Into<String>, error: SinkError) -> Self {
        Self {
            table: table.into(),
            state: SinkState::Failed,
            schema: Vec::new(),
            sender: None,
            job: None,
            error: Some(error),
            rows_written: 0,
            rows_rejected: 0,
            rows_dropped: 0,
            opened_at: Instant::now(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// The table schema covering every row written so far.
    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job.as_ref().map(LoadJob::id)
    }

    /// Write one row, waiting for stream capacity if the buffer is full.
    ///
    /// The future only resolves once the row is buffered (or refused), so a
    /// caller awaiting it cannot outrun the load job.
    pub async fn write(&mut self, row: &Normalized) -> WriteOutcome {
        if self.state != SinkState::Open {
            self.rows_dropped += 1;
            return WriteOutcome::Dropped;
        }

        let grew = match merge_fields(&mut self.schema, &row.schema) {
            Ok(grew) => grew,
            Err(e) => {
                warn!(
                    table = %self.table,
                    pk = %row.envelope.keys.pk,
                    sk = %row.envelope.keys.sk,
                    error = %e,
                    "Rejecting row with conflicting schema"
                );
                self.rows_rejected += 1;
                return WriteOutcome::Rejected;
            }
        };

        let mut line = match serde_json::to_vec(&row.envelope) {
            Ok(line) => line,
            Err(e) => {
                warn!(table = %self.table, error = %e, "Rejecting unserializable row");
                self.rows_rejected += 1;
                return WriteOutcome::Rejected;
            }
        };
        line.push(b'\n');

        let mut waited = false;
        if grew {
            match self.send(LoadChunk::Schema(self.schema.clone())).await {
                Ok(w) => waited |= w,
                Err(e) => return self.fail(e),
            }
        }
        match self.send(LoadChunk::Row(Bytes::from(line))).await {
            Ok(w) => waited |= w,
            Err(e) => return self.fail(e),
        }

        self.rows_written += 1;
        if waited {
            WriteOutcome::Backpressured
        } else {
            WriteOutcome::Accepted
        }
    }

    /// Send a chunk, returning whether the stream was full and had to drain.
    async fn send(&self, chunk: LoadChunk) -> Result<bool, SinkError> {
        let closed = || SinkError::StreamClosed {
            table: self.table.clone(),
        };
        let sender = self.sender.as_ref().ok_or_else(closed)?;

        match sender.try_send(chunk) {
            Ok(()) => Ok(false),
            Err(TrySendError::Full(chunk)) => {
                let start = Instant::now();
                sender.send(chunk).await.map_err(|_| closed())?;
                emit!(SinkBackpressure {
                    table: self.table.clone(),
                    waited: start.elapsed(),
                });
                Ok(true)
            }
            Err(TrySendError::Closed(_)) => Err(closed()),
        }
    }

    fn fail(&mut self, e: SinkError) -> WriteOutcome {
        error!(
            table = %self.table,
            error = %e,
            "Load stream failed, dropping rows for this table until the window closes"
        );
        self.state = SinkState::Failed;
        self.sender = None;
        self.error.get_or_insert(e);
        self.rows_dropped += 1;
        WriteOutcome::Dropped
    }

    /// End the stream. No further rows are accepted.
    pub async fn end(&mut self) {
        if self.state != SinkState::Open {
            return;
        }
        if self.rows_rejected > 0 {
            // A job that already exited reports its own error on completion.
            let _ = self.send(LoadChunk::BadRecords(self.rows_rejected)).await;
        }
        self.sender = None;
        self.state = SinkState::Draining;
    }

    /// End the stream if needed and wait for the load job to resolve.
    pub async fn complete(mut self) -> SinkReport {
        self.end().await;

        let outcome = match (self.job.take(), self.error.take()) {
            (Some(job), recorded) => match (job.wait().await, recorded) {
                (Ok(stats), None) => Ok(stats),
                (Ok(_), Some(e)) | (Err(e), _) => Err(e),
            },
            (None, Some(e)) => Err(e),
            (None, None) => Err(SinkError::StreamClosed {
                table: self.table.clone(),
            }),
        };

        let state = if outcome.is_ok() {
            SinkState::Completed
        } else {
            SinkState::Failed
        };

        SinkReport {
            table: self.table,
            state,
            rows_written: self.rows_written,
            rows_rejected: self.rows_rejected,
            rows_dropped: self.rows_dropped,
            outcome,
            duration: self.opened_at.elapsed(),
        }
    }
}

//! Batch windows.
//!
//! A [`BatchWindow`] holds at most one [`TableSink`] per table, opened lazily
//! on the first row routed to that table. Closing the window ends every sink
//! and then waits for all of their load jobs, observing each outcome whether
//! or not others fail.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use sluice_core::emit;
use sluice_core::metrics::events::{
    BatchWindowClosed, LoadJobCompleted, LoadJobFailed, RecordsWritten, SinkOpened,
};

use super::table::{SinkReport, TableSink, WriteOutcome};
use super::traits::{LoadOptions, LoadRequest, Warehouse};
use crate::record::Normalized;

/// Settings applied to every sink a window opens.
#[derive(Debug, Clone, Copy)]
pub struct SinkSettings {
    pub load: LoadOptions,
    /// Rows buffered per sink before writes wait.
    pub capacity: usize,
}

/// The outcome of every sink in a closed window.
#[derive(Debug)]
pub struct WindowReport {
    pub index: usize,
    pub sinks: Vec<SinkReport>,
}

impl WindowReport {
    pub fn succeeded(&self) -> usize {
        self.sinks.iter().filter(|s| s.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.sinks.len() - self.succeeded()
    }

    pub fn rows_loaded(&self) -> u64 {
        self.sinks
            .iter()
            .filter_map(|s| s.outcome.as_ref().ok())
            .map(|stats| stats.output_rows)
            .sum()
    }

    pub fn bad_records(&self) -> u64 {
        self.sinks
            .iter()
            .filter_map(|s| s.outcome.as_ref().ok())
            .map(|stats| stats.bad_records)
            .sum()
    }

    pub fn rows_dropped(&self) -> u64 {
        self.sinks.iter().map(|s| s.rows_dropped).sum()
    }
}

/// Table sinks opened since the last drain barrier.
pub struct BatchWindow {
    index: usize,
    warehouse: Arc<dyn Warehouse>,
    settings: SinkSettings,
    sinks: IndexMap<String, TableSink>,
    opened_at: Instant,
}

impl BatchWindow {
    pub fn new(index: usize, warehouse: Arc<dyn Warehouse>, settings: SinkSettings) -> Self {
        Self {
            index,
            warehouse,
            settings,
            sinks: IndexMap::new(),
            opened_at: Instant::now(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Tables with a sink in this window, in the order they were opened.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Route a row to its table's sink, opening the sink on first use.
    ///
    /// Resolves once the row is buffered, which may mean waiting for the
    /// table's load job to catch up.
    pub async fn write(&mut self, row: Normalized) -> WriteOutcome {
        if !self.sinks.contains_key(&row.table) {
            let sink = self.open_sink(&row).await;
            self.sinks.insert(row.table.clone(), sink);
        }
        let Some(sink) = self.sinks.get_mut(&row.table) else {
            return WriteOutcome::Dropped;
        };

        let outcome = sink.write(&row).await;
        if outcome.is_written() {
            emit!(RecordsWritten {
                count: 1,
                table: row.table,
            });
        }
        outcome
    }

    async fn open_sink(&self, row: &Normalized) -> TableSink {
        let request = LoadRequest {
            table: row.table.clone(),
            schema: row.schema.clone(),
            options: self.settings.load,
            capacity: self.settings.capacity,
            window: self.index,
        };

        match TableSink::open(self.warehouse.as_ref(), request).await {
            Ok(sink) => {
                info!(
                    table = %row.table,
                    window = self.index,
                    job_id = sink.job_id().unwrap_or_default(),
                    "Started load job"
                );
                emit!(SinkOpened {
                    table: row.table.clone(),
                });
                sink
            }
            Err(e) => {
                error!(
                    table = %row.table,
                    window = self.index,
                    error = %e,
                    "Failed to open load stream, rows for this table are dropped until the window closes"
                );
                TableSink::failed(row.table.clone(), e)
            }
        }
    }

    /// End every sink, then wait for all load jobs to settle.
    pub async fn close(mut self) -> WindowReport {
        let start = Instant::now();
        for sink in self.sinks.values_mut() {
            sink.end().await;
        }

        let sink_count = self.sinks.len();
        debug!(window = self.index, sinks = sink_count, "Waiting for load jobs");
        let sinks = join_all(self.sinks.into_values().map(TableSink::complete)).await;

        for report in &sinks {
            log_report(report);
        }

        emit!(BatchWindowClosed {
            sinks: sink_count as u64,
            duration: start.elapsed(),
        });
        info!(
            window = self.index,
            sinks = sink_count,
            open_for_ms = self.opened_at.elapsed().as_millis() as u64,
            "Closed batch window"
        );

        WindowReport {
            index: self.index,
            sinks,
        }
    }
}

fn log_report(report: &SinkReport) {
    match &report.outcome {
        Ok(stats) => {
            info!(
                table = %report.table,
                job_id = %stats.job_id,
                rows = stats.output_rows,
                "Finished load job"
            );
            if stats.bad_records != 0 {
                warn!(
                    table = %report.table,
                    bad_records = stats.bad_records,
                    "Load job finished with bad records"
                );
            }
            emit!(LoadJobCompleted {
                table: report.table.clone(),
                rows: stats.output_rows,
                bad_records: stats.bad_records,
                duration: report.duration,
            });
        }
        Err(e) => {
            error!(
                table = %report.table,
                reason = %e,
                location = e.location().unwrap_or_default(),
                rows_dropped = report.rows_dropped,
                "Load job failed"
            );
            emit!(LoadJobFailed {
                table: report.table.clone(),
            });
        }
    }
}
